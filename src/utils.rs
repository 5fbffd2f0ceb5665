use std::fmt::Write;

use crate::types::Uid;

/// Lovingly borrowed from the cargo crate
///
/// Joins an iterator of [std::fmt::Display]'ables into an output writable
pub(crate) fn iter_join_onto<W, I, T>(mut w: W, iter: I, delim: &str) -> std::fmt::Result
where
    W: std::fmt::Write,
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut it = iter.into_iter().peekable();
    while let Some(n) = it.next() {
        write!(w, "{}", n)?;
        if it.peek().is_some() {
            write!(w, "{}", delim)?;
        }
    }
    Ok(())
}

/// Lovingly borrowed from the cargo crate
///
/// Joins an iterator of [std::fmt::Display]'ables to a new [std::string::String].
pub(crate) fn iter_join<I, T>(iter: I, delim: &str) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut s = String::new();
    let _ = iter_join_onto(&mut s, iter, delim);
    s
}

/// Collapse ascending UIDs into `(first, last)` runs of consecutive values.
fn runs(uids: &[Uid]) -> Vec<(Uid, Uid)> {
    let mut runs: Vec<(Uid, Uid)> = Vec::new();
    for &uid in uids {
        match runs.last_mut() {
            Some((_, last)) if last.checked_add(1) == Some(uid) => *last = uid,
            Some((_, last)) if *last == uid => {}
            _ => runs.push((uid, uid)),
        }
    }
    runs
}

fn push_run(set: &mut String, (first, last): (Uid, Uid)) {
    if !set.is_empty() {
        set.push(',');
    }
    let _ = if first == last {
        write!(set, "{}", first)
    } else {
        write!(set, "{}:{}", first, last)
    };
}

/// Split ascending UIDs into IMAP sequence-sets of at most `limit` bytes each.
///
/// Consecutive UIDs are written as ranges. A single run that is longer than `limit` on its own
/// still gets a set of its own.
pub(crate) fn uid_set_batches(uids: &[Uid], limit: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for run in runs(uids) {
        let mut piece = String::new();
        push_run(&mut piece, run);
        let needed = if current.is_empty() {
            piece.len()
        } else {
            current.len() + 1 + piece.len()
        };
        if needed > limit && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        push_run(&mut current, run);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join() {
        assert_eq!(iter_join(["a", "b", "c"], ", "), "a, b, c");
        assert_eq!(iter_join(Vec::<u32>::new(), ","), "");
    }

    #[test]
    fn compact_ranges() {
        assert_eq!(
            uid_set_batches(&[1, 2, 3, 5, 7, 8, 10], 768),
            vec!["1:3,5,7:8,10".to_string()]
        );
    }

    #[test]
    fn batches_respect_limit() {
        let uids: Vec<Uid> = (1..=40).map(|n| n * 10).collect();
        let batches = uid_set_batches(&uids, 20);
        assert!(batches.len() > 1);
        for b in &batches {
            assert!(b.len() <= 20, "{} is too long", b);
        }
        let rejoined: Vec<Uid> = batches
            .iter()
            .flat_map(|b| b.split(',').map(|n| n.parse::<Uid>().unwrap()))
            .collect();
        assert_eq!(rejoined, uids);
    }
}
