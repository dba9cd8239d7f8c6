#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported authentication mechanisms
pub enum AuthMechanism {
    /// Plain user/password in a single base64 response
    Plain,
    /// User and password sent as two separate base64 responses
    Login,
}

impl AuthMechanism {
    // The mechanism name as shown in the AUTH extension
    pub(crate) fn name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
        }
    }
}
