// Smtp commands sent by the client
#[derive(Clone, Debug)]
pub(crate) enum Cmd<'a> {
    Ehlo {
        domain: &'a str,
    },
    Helo {
        domain: &'a str,
    },
    Mail {
        reverse_path: &'a str,
        is8bit: bool,
        size: Option<usize>,
    },
    Rcpt {
        forward_path: &'a str,
    },
    Data,
    Rset,
    Noop,
    StartTls,
    Quit,
    Vrfy,
    AuthPlain {
        authorization_id: String,
        authentication_id: String,
        password: String,
    },
    AuthPlainEmpty,
    // AUTH PLAIN with an initial response that is not a SASL PLAIN message
    AuthPlainUndecodable,
    AuthLogin {
        initial: Option<&'a [u8]>,
    },
    // AUTH with a mechanism the parser does not know
    AuthUnknown,
    // Dummy command containing client authentication
    AuthResponse {
        response: &'a [u8],
    },
    // Dummy command to signify end of data
    DataEnd,
}

pub(crate) struct Credentials {
    pub authorization_id: String,
    pub authentication_id: String,
    pub password: String,
}
