mod login;

pub use login::require_login;
