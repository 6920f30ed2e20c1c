//! Reply subject and recipient rules.

use crate::domain::Address;

const REPLY_PREFIX: &str = "Re: ";

/// Prefixes `Re: ` unless the subject already starts with it (any case).
///
/// Only the exact prefix counts: `re:Hello` and `Re:: x` are prefixed again.
/// A bare `Re:` subject, the reply to an empty subject, is kept.
pub fn reply_subject(original: &str) -> String {
    let original = original.trim();
    let already_reply = original
        .get(..REPLY_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(REPLY_PREFIX))
        || original.eq_ignore_ascii_case(REPLY_PREFIX.trim_end());
    if already_reply {
        original.to_string()
    } else {
        format!("{REPLY_PREFIX}{original}").trim_end().to_string()
    }
}

/// Recipients of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyRecipients {
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
}

impl ReplyRecipients {
    /// Replies go to the original sender and keep the original CC list;
    /// `extra` addresses are appended to CC, never to "to".
    ///
    /// Blank extras and addresses already present are skipped.
    pub fn for_reply(sender: Option<Address>, original_cc: Vec<Address>, extra: &[String]) -> Self {
        let to: Vec<Address> = sender.into_iter().filter(|a| !a.email.is_empty()).collect();
        let mut cc: Vec<Address> = original_cc
            .into_iter()
            .filter(|a| !a.email.is_empty())
            .collect();

        for address in extra.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            let present = to
                .iter()
                .chain(cc.iter())
                .any(|existing| existing.email.eq_ignore_ascii_case(address));
            if !present {
                cc.push(Address::new(address));
            }
        }

        Self { to, cc }
    }
}
