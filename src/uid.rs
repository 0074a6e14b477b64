//! Best-effort extraction of an email address from a free-text User ID.
//!
//! UIDs are whatever the key owner typed, so nothing here fails: a UID we
//! cannot make sense of simply has no email address.

/// The pieces of a `Name (comment) <email>` style User ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidParts<'a> {
    pub name: Option<&'a str>,
    pub comment: Option<&'a str>,
    pub email: Option<&'a str>,
}

/// Splits a UID into name, comment and email.
///
/// The forms are tried most specific first:
///
/// 1. `name (comment) <email>`
/// 2. `name <email>`
/// 3. `email`
///
/// The first form that matches and whose email has a plausible hostname wins.
/// If none does, every part is `None`.
pub fn parse_uid_parts(uid: &str) -> UidParts<'_> {
    let candidates = [
        match_name_comment_email(uid),
        match_name_email(uid),
        match_bare_email(uid),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|parts| parts.email.is_some_and(roughly_validate_email))
        .unwrap_or_default()
}

pub fn parse_email_from_uid(uid: &str) -> Option<&str> {
    parse_uid_parts(uid).email
}

fn match_name_comment_email(uid: &str) -> Option<UidParts<'_>> {
    let body = uid.strip_suffix('>')?;

    // Shortest name first, then the longest comment that still leaves an email.
    for (name_end, _) in body.match_indices(" (") {
        let rest = &body[name_end + 2..];
        for (comment_end, _) in rest.rmatch_indices(") <") {
            let email = &rest[comment_end + 3..];
            if looks_like_email(email) {
                return Some(UidParts {
                    name: Some(&body[..name_end]),
                    comment: Some(&rest[..comment_end]),
                    email: Some(email),
                });
            }
        }
    }
    None
}

fn match_name_email(uid: &str) -> Option<UidParts<'_>> {
    let body = uid.strip_suffix('>')?;

    for (name_end, _) in body.match_indices(" <") {
        let email = &body[name_end + 2..];
        if looks_like_email(email) {
            return Some(UidParts {
                name: Some(&body[..name_end]),
                comment: None,
                email: Some(email),
            });
        }
    }
    None
}

fn match_bare_email(uid: &str) -> Option<UidParts<'_>> {
    looks_like_email(uid).then_some(UidParts {
        name: None,
        comment: None,
        email: Some(uid),
    })
}

/// `something@something.something`, with no whitespace or angle brackets.
fn looks_like_email(candidate: &str) -> bool {
    if candidate
        .chars()
        .any(|c| c.is_whitespace() || c == '<' || c == '>')
    {
        return false;
    }

    candidate.match_indices('@').any(|(at, _)| {
        let domain = &candidate[at + 1..];
        at > 0
            && domain
                .match_indices('.')
                .any(|(dot, _)| dot > 0 && dot + 1 < domain.len())
    })
}

fn roughly_validate_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((_, hostname)) => roughly_validate_hostname(hostname),
        None => false,
    }
}

fn roughly_validate_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 255 {
        return false;
    }

    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    let labels: Vec<&str> = hostname.split('.').collect();

    if labels.last().is_some_and(|tld| tld.eq_ignore_ascii_case("onion")) {
        return false;
    }

    labels.iter().all(|label| is_valid_label(label))
}

fn is_valid_label(label: &str) -> bool {
    (1..=63).contains(&label.len())
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
