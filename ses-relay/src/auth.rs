use relay_server::AuthResult;

/// How clients are allowed to submit mail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// AUTH is not offered and every client may send
    Disabled,
    /// Clients may send without AUTH, AUTH is still checked when attempted
    AnonymousAllowed,
    /// Clients must AUTH with the configured username and password
    CredentialRequired,
}

pub struct AuthGate {
    policy: AuthPolicy,
    username: Option<String>,
    password: Option<String>,
}

impl AuthGate {
    pub fn new(policy: AuthPolicy, username: Option<String>, password: Option<String>) -> Self {
        Self {
            policy,
            username,
            password,
        }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    /// Check credentials given with AUTH PLAIN or AUTH LOGIN.
    ///
    /// A non-empty authorization identity must name the authenticating user,
    /// acting on behalf of someone else is not supported.
    pub fn authenticate(
        &self,
        authorization_id: &str,
        username: &str,
        password: &str,
    ) -> AuthResult {
        if self.policy == AuthPolicy::Disabled {
            return AuthResult::Ok;
        }
        let (expected_user, expected_password) = match (&self.username, &self.password) {
            (Some(user), Some(password)) => (user, password),
            _ => return AuthResult::InvalidCredentials,
        };
        // Both comparisons always run
        let user_ok = username == expected_user;
        let password_ok = password == expected_password;
        let authz_ok = authorization_id.is_empty() || authorization_id == username;
        if user_ok & password_ok & authz_ok {
            AuthResult::Ok
        } else {
            AuthResult::InvalidCredentials
        }
    }

    /// May a client that has not authenticated start a mail transaction
    pub fn authenticate_anonymous(&self) -> AuthResult {
        match self.policy {
            AuthPolicy::Disabled | AuthPolicy::AnonymousAllowed => AuthResult::Ok,
            AuthPolicy::CredentialRequired => AuthResult::InvalidCredentials,
        }
    }
}
