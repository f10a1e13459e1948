//! Parsing of the control module's `ListUsers` table.
//!
//! The reply is a sequence of IRC lines. Lines are split on single spaces and
//! only records with more than four fields are considered part of the table;
//! border rows like `:+------+` have four fields and fall out naturally:
//!
//! ```text
//! :*controlpanel!znc@znc.in PRIVMSG admin :+----------+-----------+
//! :*controlpanel!znc@znc.in PRIVMSG admin :| Username | Realname  |
//! :*controlpanel!znc@znc.in PRIVMSG admin :| alice    | Alice     |
//! ```
//!
//! The fifth field (index 4) is the identifier. The first table record must
//! carry the header literal, otherwise we are not talking to the module we
//! think we are talking to.

use common::{AccountSet, Result, SweepError};

const IDENTIFIER_FIELD: usize = 4;

/// IRC numeric sent when the server password is wrong.
const ERR_PASSWDMISMATCH: &str = "464";

pub fn parse_user_listing(response: &str, header: &str) -> Result<AccountSet> {
    let mut records = response
        .lines()
        .map(|line| line.split(' ').collect::<Vec<_>>())
        .filter(|fields| fields.len() > IDENTIFIER_FIELD);

    let first = records.next().ok_or_else(|| {
        SweepError::Protocol(format!(
            "listing response contained no table records (expected header '{header}')"
        ))
    })?;
    if first[IDENTIFIER_FIELD] != header {
        return Err(SweepError::Protocol(format!(
            "unexpected listing header '{}' (expected '{header}')",
            first[IDENTIFIER_FIELD]
        )));
    }

    Ok(records
        .map(|fields| fields[IDENTIFIER_FIELD].to_string())
        .collect())
}

/// Inspect the burst that follows authentication for a rejected password.
pub fn check_logon_reply(reply: &str) -> Result<()> {
    for line in reply.lines() {
        let mut fields = line.split(' ');
        let _prefix = fields.next();
        if fields.next() == Some(ERR_PASSWDMISMATCH) {
            return Err(SweepError::Configuration(format!(
                "bouncer rejected the administrator credentials: {line}"
            )));
        }
    }
    Ok(())
}
