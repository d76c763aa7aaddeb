//! `Fragment` (spec.md §3) and the sidx atom splicer (spec.md §4.4
//! "Sidx fix-up"), grounded on `original_source/ytarchive.py`'s
//! `get_atoms`/`remove_sidx` translated to explicit `Result`-returning Rust.

use bytes::Bytes;

/// One downloaded media fragment: its sequence number, the server-advertised
/// high-water sequence seen on this fetch, and its buffered bytes.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub seq: u64,
    pub x_head_seqnum: i64,
    pub data: Bytes,
}

/// Top-level ISO-BMFF atom: a 4-byte big-endian length followed by a 4-byte
/// ASCII name.
#[derive(Debug, Clone, Copy)]
struct Atom {
    offset: usize,
    len: usize,
}

/// Scan top-level atoms in `data`, matching `original_source/ytarchive.py`'s
/// `get_atoms`: stop at the first atom whose declared length would run past
/// the buffer, rather than treating it as an error — the buffer is only a
/// prefix of the fragment, so a partial trailing atom is expected.
fn find_atom<'a>(data: &'a [u8], want: &[u8; 4]) -> Option<Atom> {
    let mut offset = 0usize;
    loop {
        if offset + 8 > data.len() {
            return None;
        }
        let len = u32::from_be_bytes(data[offset..offset + 4].try_into().ok()?) as usize;
        let name = &data[offset + 4..offset + 8];
        if len < 8 {
            // Malformed/extended-size atom; stop scanning rather than loop
            // forever or underflow `offset`.
            return None;
        }
        if name == want {
            return Some(Atom { offset, len });
        }
        offset += len;
        if offset >= data.len() {
            return None;
        }
    }
}

/// Remove a top-level `sidx` atom from the first buffered chunk of a
/// fragment, per spec.md §4.4. Idempotent: a sidx-free input is returned
/// unchanged (spec.md §8).
pub fn remove_sidx(data: &[u8]) -> Bytes {
    match find_atom(data, b"sidx") {
        Some(atom) => {
            let mut out = Vec::with_capacity(data.len() - atom.len);
            out.extend_from_slice(&data[..atom.offset]);
            out.extend_from_slice(&data[atom.offset + atom.len..]);
            Bytes::from(out)
        }
        None => Bytes::copy_from_slice(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn strips_top_level_sidx_atom() {
        let mut data = atom(b"styp", b"isom");
        data.extend(atom(b"sidx", &[0u8; 20]));
        data.extend(atom(b"moof", &[1u8; 4]));

        let out = remove_sidx(&data);
        // styp directly followed by moof, sidx bytes gone.
        let expected_len = atom(b"styp", b"isom").len() + atom(b"moof", &[1u8; 4]).len();
        assert_eq!(out.len(), expected_len);
        assert_eq!(&out[4..8], b"styp");
        let styp_len = atom(b"styp", b"isom").len();
        assert_eq!(&out[styp_len + 4..styp_len + 8], b"moof");
    }

    #[test]
    fn is_idempotent_on_sidx_free_input() {
        let data = atom(b"styp", b"isom");
        let once = remove_sidx(&data);
        let twice = remove_sidx(&once);
        assert_eq!(once, twice);
        assert_eq!(once.as_ref(), data.as_slice());
    }

    #[test]
    fn handles_truncated_trailing_atom_without_panicking() {
        let mut data = atom(b"styp", b"isom");
        // Declares a length far beyond what's present.
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"moof");
        let out = remove_sidx(&data);
        assert_eq!(out.as_ref(), data.as_slice());
    }
}
