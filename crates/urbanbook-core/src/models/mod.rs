//! Data models shared by the session store and the API client.
//!
//! - `user`: the authenticated principal (`User`, `UserRole`, `Address`)
//! - `auth`: request/response bodies for the authentication endpoints

pub mod auth;
pub mod user;

pub use auth::{
    AuthResponse, ChangePasswordRequest, LoginCredentials, PasswordResetConfirm,
    PasswordResetRequest, RegisterCustomerData, RegisterProfessionalData, UpdateProfileRequest,
};
pub use user::{Address, Coordinates, User, UserRole};
