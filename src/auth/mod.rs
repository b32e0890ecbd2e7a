//! Session gate and credential forms.

mod forms;
mod gate;

pub use forms::{
    login, logout, register, AuthError, LoginForm, LoginOutcome, RegisterForm,
    INVALID_CREDENTIALS_MESSAGE, REGISTERED_NOTICE,
};
pub use gate::{gate, Access, GateDecision};
