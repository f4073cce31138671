pub mod pages;
pub mod saml;
