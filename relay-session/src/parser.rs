use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, rest, value};
use nom::multi::many0;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use crate::cmd::{Cmd, Credentials};
use crate::response::{Response, MISSING_PARAMETER, SYNTAX_ERROR};
use std::str;

//----- Parser -----------------------------------------------------------------

// Parse a line from the client
pub(crate) fn parse(line: &[u8]) -> Result<Cmd, Response> {
    command(trim_line_ending(line))
        .map(|r| r.1)
        .map_err(|e| match e {
            nom::Err::Incomplete(_) => MISSING_PARAMETER,
            nom::Err::Error(_) | nom::Err::Failure(_) => SYNTAX_ERROR,
        })
}

// Remove a trailing \r\n or \n
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn command(buf: &[u8]) -> IResult<&[u8], Cmd> {
    all_consuming(terminated(
        alt((
            helo, ehlo, mail, rcpt, data, rset, quit, vrfy, noop, starttls, auth,
        )),
        space0,
    ))(buf)
}

fn hello_domain(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(is_not(" \t\r\n"), str::from_utf8)(buf)
}

fn helo(buf: &[u8]) -> IResult<&[u8], Cmd> {
    map(
        preceded(tuple((tag_no_case("helo"), space1)), hello_domain),
        |domain| Cmd::Helo { domain },
    )(buf)
}

fn ehlo(buf: &[u8]) -> IResult<&[u8], Cmd> {
    map(
        preceded(tuple((tag_no_case("ehlo"), space1)), hello_domain),
        |domain| Cmd::Ehlo { domain },
    )(buf)
}

// The path between angle brackets, empty for the null reverse path
fn mail_path(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        take_while(|c: u8| !matches!(c, b' ' | b'<' | b'>' | b'\t' | b'\r' | b'\n')),
        str::from_utf8,
    )(buf)
}

fn angle_path(buf: &[u8]) -> IResult<&[u8], &str> {
    preceded(
        tuple((space0, tag("<"))),
        terminated(mail_path, tag(">")),
    )(buf)
}

// ESMTP parameters that follow MAIL FROM
#[derive(Clone)]
enum MailParam {
    Body(bool),
    Size(usize),
    Other,
}

fn body_param(buf: &[u8]) -> IResult<&[u8], MailParam> {
    preceded(
        tag_no_case("body="),
        alt((
            value(MailParam::Body(true), tag_no_case("8bitmime")),
            value(MailParam::Body(false), tag_no_case("7bit")),
        )),
    )(buf)
}

fn size_param(buf: &[u8]) -> IResult<&[u8], MailParam> {
    preceded(
        tag_no_case("size="),
        map_res(map_res(digit1, str::from_utf8), |s: &str| {
            s.parse::<usize>().map(MailParam::Size)
        }),
    )(buf)
}

fn other_param(buf: &[u8]) -> IResult<&[u8], MailParam> {
    value(MailParam::Other, is_not(" \t\r\n"))(buf)
}

fn mail_params(buf: &[u8]) -> IResult<&[u8], Vec<MailParam>> {
    many0(preceded(space1, alt((body_param, size_param, other_param))))(buf)
}

fn mail(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let (buf, _) = tuple((tag_no_case("mail"), space1, tag_no_case("from:")))(buf)?;
    let (buf, reverse_path) = angle_path(buf)?;
    let (buf, params) = mail_params(buf)?;
    let mut is8bit = false;
    let mut size = None;
    for param in params {
        match param {
            MailParam::Body(b) => is8bit = b,
            MailParam::Size(s) => size = Some(s),
            MailParam::Other => (),
        }
    }
    Ok((
        buf,
        Cmd::Mail {
            reverse_path,
            is8bit,
            size,
        },
    ))
}

fn rcpt(buf: &[u8]) -> IResult<&[u8], Cmd> {
    map(
        preceded(
            tuple((tag_no_case("rcpt"), space1, tag_no_case("to:"))),
            terminated(angle_path, mail_params),
        ),
        |forward_path| Cmd::Rcpt { forward_path },
    )(buf)
}

fn data(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Data, tag_no_case("data"))(buf)
}

fn rset(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Rset, tag_no_case("rset"))(buf)
}

fn quit(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Quit, tag_no_case("quit"))(buf)
}

fn vrfy(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(
        Cmd::Vrfy,
        tuple((tag_no_case("vrfy"), space1, is_not("\r\n"))),
    )(buf)
}

fn noop(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(
        Cmd::Noop,
        tuple((tag_no_case("noop"), opt(preceded(space1, rest)))),
    )(buf)
}

fn starttls(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::StartTls, tag_no_case("starttls"))(buf)
}

fn is_base64(chr: u8) -> bool {
    chr.is_ascii_alphanumeric() || chr == b'+' || chr == b'/' || chr == b'='
}

fn auth_initial(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(space1, take_while1(is_base64))(buf)
}

fn auth_plain(buf: &[u8]) -> IResult<&[u8], Cmd> {
    map(
        preceded(tag_no_case("plain"), opt(auth_initial)),
        |initial| match initial {
            Some(initial) => match decode_sasl_plain(initial) {
                Some(creds) => Cmd::AuthPlain {
                    authorization_id: creds.authorization_id,
                    authentication_id: creds.authentication_id,
                    password: creds.password,
                },
                None => Cmd::AuthPlainUndecodable,
            },
            None => Cmd::AuthPlainEmpty,
        },
    )(buf)
}

fn auth_login(buf: &[u8]) -> IResult<&[u8], Cmd> {
    map(
        preceded(tag_no_case("login"), opt(auth_initial)),
        |initial| Cmd::AuthLogin { initial },
    )(buf)
}

fn auth_unknown(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::AuthUnknown, tuple((is_not(" \t\r\n"), rest)))(buf)
}

fn auth(buf: &[u8]) -> IResult<&[u8], Cmd> {
    preceded(
        tuple((tag_no_case("auth"), space1)),
        alt((auth_plain, auth_login, auth_unknown)),
    )(buf)
}

//---- Helper functions ---------------------------------------------------------

// Decodes the base64 encoded plain authentication parameter.
// The message must hold exactly three NUL separated UTF-8 fields and a
// non-empty authentication identity.
pub(crate) fn decode_sasl_plain(param: &[u8]) -> Option<Credentials> {
    let bytes = base64::decode(param).ok()?;
    let fields: Vec<&[u8]> = bytes.split(|b| b == &0u8).collect();
    if fields.len() != 3 || fields[1].is_empty() {
        return None;
    }
    let mut strings = fields.into_iter().map(|f| str::from_utf8(f).map(str::to_owned));
    Some(Credentials {
        authorization_id: strings.next()?.ok()?,
        authentication_id: strings.next()?.ok()?,
        password: strings.next()?.ok()?,
    })
}

// Decodes a single base64 SASL response into a string
pub(crate) fn decode_base64_string(param: &[u8]) -> Option<String> {
    let bytes = base64::decode(param).ok()?;
    String::from_utf8(bytes).ok()
}

//---- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn auth_initial() {
        let res = parse(b"auth plain dGVzdAB0ZXN0ADEyMzQ=\r\n");
        match res {
            Ok(Cmd::AuthPlain {
                authorization_id,
                authentication_id,
                password,
            }) => {
                assert_eq!(authorization_id, "test");
                assert_eq!(authentication_id, "test");
                assert_eq!(password, "1234");
            }
            _ => panic!("Auth plain with initial response incorrectly parsed"),
        };
    }

    #[test]
    fn auth_empty() {
        assert_matches!(parse(b"auth plain"), Ok(Cmd::AuthPlainEmpty));
    }

    #[test]
    fn auth_login() {
        assert_matches!(
            parse(b"AUTH LOGIN\r\n"),
            Ok(Cmd::AuthLogin { initial: None })
        );
        assert_matches!(
            parse(b"AUTH LOGIN dGVzdA==\r\n"),
            Ok(Cmd::AuthLogin {
                initial: Some(b"dGVzdA==")
            })
        );
    }

    #[test]
    fn auth_other_mechanism() {
        assert_matches!(parse(b"auth cram-md5\r\n"), Ok(Cmd::AuthUnknown));
    }

    #[test]
    fn mail_params() {
        match parse(b"MAIL FROM:<ship@sea.com> BODY=8BITMIME SIZE=1024\r\n") {
            Ok(Cmd::Mail {
                reverse_path,
                is8bit,
                size,
            }) => {
                assert_eq!(reverse_path, "ship@sea.com");
                assert!(is8bit);
                assert_eq!(size, Some(1024));
            }
            _ => panic!("Mail with parameters incorrectly parsed"),
        }
    }

    #[test]
    fn null_reverse_path() {
        assert_matches!(
            parse(b"mail from:<>\r\n"),
            Ok(Cmd::Mail {
                reverse_path: "",
                is8bit: false,
                size: None
            })
        );
    }

    #[test]
    fn space_after_colon() {
        assert_matches!(
            parse(b"rcpt to: <fish@sea.com>\r\n"),
            Ok(Cmd::Rcpt {
                forward_path: "fish@sea.com"
            })
        );
    }

    #[test]
    fn simple_commands() {
        assert_matches!(parse(b"DATA\r\n"), Ok(Cmd::Data));
        assert_matches!(parse(b"rset"), Ok(Cmd::Rset));
        assert_matches!(parse(b"Quit\r\n"), Ok(Cmd::Quit));
        assert_matches!(parse(b"noop\r\n"), Ok(Cmd::Noop));
        assert_matches!(parse(b"STARTTLS\r\n"), Ok(Cmd::StartTls));
        assert_matches!(parse(b"vrfy kraken\r\n"), Ok(Cmd::Vrfy));
    }

    #[test]
    fn syntax_errors() {
        assert_matches!(parse(b"data now\r\n"), Err(Response { code: 500, .. }));
        assert_matches!(parse(b"mail from:ship\r\n"), Err(Response { code: 500, .. }));
        assert_matches!(parse(b"helo\r\n"), Err(Response { code: 500, .. }));
    }

    #[test]
    fn sasl_plain_undecodable() {
        assert!(decode_sasl_plain(b"!!!").is_none());
        // "test\0test", no password field
        assert!(decode_sasl_plain(b"dGVzdAB0ZXN0").is_none());
        // "\0\01234", no authentication identity
        assert!(decode_sasl_plain(b"AAAxMjM0").is_none());
        assert_matches!(parse(b"auth plain AAA\r\n"), Ok(Cmd::AuthPlainUndecodable));
    }

    #[test]
    fn sasl_plain_without_authorization_id() {
        // "\0test\01234"
        let creds = decode_sasl_plain(b"AHRlc3QAMTIzNA==").unwrap();
        assert_eq!(creds.authorization_id, "");
        assert_eq!(creds.authentication_id, "test");
        assert_eq!(creds.password, "1234");
    }
}
