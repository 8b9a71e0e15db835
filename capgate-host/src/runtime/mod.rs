//! Runtime side of access control: script values and the validator that
//! guards every dynamic call and attribute fetch

mod validator;
mod value;

pub use validator::{Dispatcher, RuntimeValidator, DEFAULT_MAX_DEPTH};
pub use value::{CallableIdentity, CallableRef, HostObject, Value};
