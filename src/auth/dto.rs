use serde::{Deserialize, Serialize};

/// Form body for `POST /users` and `POST /sessions`.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Form body for `POST /reset_password`.
#[derive(Debug, Default, Deserialize)]
pub struct ResetTokenForm {
    pub email: Option<String>,
}

/// Form body for `PUT /reset_password`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePasswordForm {
    pub email: Option<String>,
    pub reset_token: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UserMessageResponse {
    pub email: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ResetTokenResponse {
    pub email: String,
    pub reset_token: String,
}
