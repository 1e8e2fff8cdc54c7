//! Authorization guard.

use tart_core::Principal;
use tart_state::Tart;

use crate::error::{TartError, TartResult};

/// Exact, case-sensitive membership test.
pub fn is_owner(username: &str, owners: &[String]) -> bool {
    owners.iter().any(|owner| owner == username)
}

/// Allow the trusted console unconditionally, otherwise require ownership.
pub fn authorize(principal: &Principal, tart: &Tart) -> TartResult<()> {
    match principal {
        Principal::Trusted => Ok(()),
        Principal::User(name) if is_owner(name, &tart.owners) => Ok(()),
        Principal::User(name) => Err(TartError::Unauthorized(name.clone())),
    }
}
