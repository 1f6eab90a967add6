//! IMAP command handlers for the fake server.
//!
//! One module per command. Handlers write their untagged responses and
//! the tagged completion; the server loop owns parsing and state.

mod expunge;

pub use capability::handle_capability;
pub use expunge::handle_expunge;
pub use fetch::handle_fetch;
pub use list::handle_list;
pub use login::handle_login;
pub use logout::handle_logout;
pub use noop::handle_noop;
pub use select::handle_select;
pub use status::handle_status;
pub use uid_fetch::handle_uid_fetch;
pub use uid_store::handle_uid_store;

use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

/// Expand a sequence set into sorted, distinct numbers. `*` stands for
/// `max`; a range is inclusive in either order.
pub fn expand_sequence_set(seq_set: &SequenceSet, max: u32) -> Vec<u32> {
    let value = |v: &SeqOrUid| match v {
        SeqOrUid::Value(v) => v.get(),
        SeqOrUid::Asterisk => max,
    };

    let mut out = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(v) => out.push(value(v)),
            Sequence::Range(a, b) => {
                let (a, b) = (value(a), value(b));
                out.extend(a.min(b)..=a.max(b));
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Everything a handler wrote, once the server half is dropped.
#[cfg(test)]
pub async fn drain(client: tokio::io::DuplexStream) -> String {
    let mut buf = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut tokio::io::BufReader::new(client), &mut buf)
        .await
        .unwrap();
    String::from_utf8(buf).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn value(n: u32) -> SeqOrUid {
        SeqOrUid::Value(NonZeroU32::new(n).unwrap())
    }

    fn set(seqs: Vec<Sequence>) -> SequenceSet {
        SequenceSet(seqs.try_into().unwrap())
    }

    #[test]
    fn expands_singles_and_ranges() {
        let s = set(vec![
            Sequence::Single(value(7)),
            Sequence::Range(value(2), value(4)),
            Sequence::Single(value(3)),
        ]);
        assert_eq!(expand_sequence_set(&s, 10), vec![2, 3, 4, 7]);
    }

    #[test]
    fn asterisk_is_max_and_reversed_ranges_work() {
        let s = set(vec![Sequence::Range(SeqOrUid::Asterisk, value(8))]);
        assert_eq!(expand_sequence_set(&s, 10), vec![8, 9, 10]);
    }
}
