//! EXPUNGE and UID EXPUNGE (RFC 4315) command handler.
//!
//! Plain EXPUNGE removes every `\Deleted` message from the selected
//! folder; UID EXPUNGE only those whose UID is in the given set. Each
//! removal is reported as `* N EXPUNGE`, where N is the sequence number
//! at the moment of removal, so later numbers shift down as earlier
//! messages go.

use crate::fake_imap::handlers::expand_sequence_set;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    uids: Option<&SequenceSet>,
    stream: &mut BufReader<S>,
) {
    // Mutate under the lock, write after releasing it.
    let expunged = selected_folder.and_then(|name| {
        let mut mb = mailbox.lock().unwrap();
        let folder = mb.get_folder_mut(name)?;
        let only = uids.map(|set| expand_sequence_set(set, folder.max_uid()));

        let mut seqs = Vec::new();
        let mut idx = 0;
        while idx < folder.emails.len() {
            let email = &folder.emails[idx];
            let targeted = only.as_ref().is_none_or(|u| u.contains(&email.uid));
            if email.deleted && targeted {
                folder.emails.remove(idx);
                seqs.push(idx + 1);
            } else {
                idx += 1;
            }
        }
        Some(seqs)
    });

    let Some(expunged) = expunged else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for seq in &expunged {
        if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
            return;
        }
    }
    let resp = format!("{tag} OK EXPUNGE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::drain;
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(mailbox: &Mutex<Mailbox>, selected: Option<&str>) -> String {
        run_uids(mailbox, selected, None).await
    }

    async fn run_uids(
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
        uids: Option<&SequenceSet>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        handle_expunge("A1", mailbox, selected, uids, &mut stream).await;
        drop(stream);
        drain(client).await
    }

    fn inbox_uids(mailbox: &Mutex<Mailbox>) -> Vec<u32> {
        let mb = mailbox.lock().unwrap();
        mb.get_folder("INBOX")
            .unwrap()
            .emails
            .iter()
            .map(|e| e.uid)
            .collect()
    }

    #[tokio::test]
    async fn reports_shifting_sequence_numbers() {
        let mut mb = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, b"a")
            .email(2, false, b"b")
            .email(3, false, b"c")
            .build();
        let inbox = mb.get_folder_mut("INBOX").unwrap();
        inbox.emails[0].deleted = true;
        inbox.emails[2].deleted = true;
        let mb = Mutex::new(mb);

        let output = run(&mb, Some("INBOX")).await;

        // UID 1 goes at seq 1; UID 3 has shifted from seq 3 to 2.
        assert_eq!(
            output,
            "* 1 EXPUNGE\r\n* 2 EXPUNGE\r\nA1 OK EXPUNGE completed\r\n"
        );
        assert_eq!(inbox_uids(&mb), vec![2]);
    }

    #[tokio::test]
    async fn uid_expunge_leaves_other_deleted_messages() {
        let mut mb = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, b"a")
            .email(2, false, b"b")
            .email(3, false, b"c")
            .build();
        let inbox = mb.get_folder_mut("INBOX").unwrap();
        inbox.emails[0].deleted = true;
        inbox.emails[2].deleted = true;
        let mb = Mutex::new(mb);

        let set = SequenceSet::try_from("3").unwrap();
        let output = run_uids(&mb, Some("INBOX"), Some(&set)).await;

        assert_eq!(output, "* 3 EXPUNGE\r\nA1 OK EXPUNGE completed\r\n");
        assert_eq!(inbox_uids(&mb), vec![1, 2]);
    }

    #[tokio::test]
    async fn nothing_deleted_is_noop() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").email(1, false, b"a").build());
        let output = run(&mb, Some("INBOX")).await;
        assert_eq!(output, "A1 OK EXPUNGE completed\r\n");
        assert_eq!(inbox_uids(&mb), vec![1]);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());
        let output = run(&mb, None).await;
        assert_eq!(output, "A1 BAD No folder selected\r\n");
    }
}
