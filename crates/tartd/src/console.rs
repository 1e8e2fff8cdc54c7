//! Management console argument handling.

use anyhow::bail;
use tart_commands::Params;

/// Turn `--key value` / `--key=value` arguments into command parameters.
pub fn parse_params(args: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(key) = arg.strip_prefix("--") else {
            bail!("unexpected argument {arg:?}; parameters look like --key value");
        };
        if let Some((key, value)) = key.split_once('=') {
            params.insert(key.to_string(), value.to_string());
            continue;
        }
        let value = match iter.peek() {
            Some(next) if !next.starts_with("--") => iter.next().cloned().unwrap_or_default(),
            _ => bail!("missing value for --{key}"),
        };
        params.insert(key.to_string(), value);
    }
    Ok(params)
}
