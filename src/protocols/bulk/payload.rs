//! Payload generation for the bulk message.
//!
//! Two traffic shapes are available:
//! - `Incompressible`: xorshift64 output mapped onto printable ASCII
//!   (0x40..=0x7F). High entropy, so a compressing transport gains nothing.
//! - `Compressible`: the reference corpus repeated end to end, so a
//!   compressing transport shrinks it dramatically.
//!
//! The mode is resolved to a plain function pointer once, when a producer
//! is built, so the per-chunk fill has no mode branch.

use super::session::SessionState;
use serde::Deserialize;

/// Reference text repeated by the compressible mode.
pub const CORPUS: &[u8] = concat!(
    "No one would have believed in the last years of the nineteenth ",
    "century that this world was being watched keenly and closely by ",
    "intelligences greater than man's and yet as mortal as his own; that as ",
    "men busied themselves about their various concerns they were ",
    "scrutinised and studied, perhaps almost as narrowly as a man with a ",
    "microscope might scrutinise the transient creatures that swarm and ",
    "multiply in a drop of water.  With infinite complacency men went to ",
    "and fro over this globe about their little affairs, serene in their ",
    "assurance of their empire over matter. It is possible that the ",
    "infusoria under the microscope do the same.  No one gave a thought to ",
    "the older worlds of space as sources of human danger, or thought of ",
    "them only to dismiss the idea of life upon them as impossible or ",
    "improbable.  It is curious to recall some of the mental habits of ",
    "those departed days.  At most terrestrial men fancied there might be ",
    "other men upon Mars, perhaps inferior to themselves and ready to ",
    "welcome a missionary enterprise. Yet across the gulf of space, minds ",
    "that are to our minds as ours are to those of the beasts that perish, ",
    "intellects vast and cool and unsympathetic, regarded this earth with ",
    "envious eyes, and slowly and surely drew their plans against us.  And ",
    "early in the twentieth century came the great disillusionment. ",
)
.as_bytes();

/// Default message size: one hundred copies of the corpus.
pub const DEFAULT_TOTAL_SIZE: usize = 100 * CORPUS.len();

/// Default bytes emitted per writable notification.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Which bytes populate the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Pseudorandom printable ASCII.
    #[default]
    Incompressible,
    /// The reference corpus, repeated.
    Compressible,
}

/// Fills `buf` with the bytes at the session's position and advances it.
pub type Filler = fn(&mut SessionState, &mut [u8]);

impl PayloadMode {
    /// Resolve the mode to its fill function.
    pub fn filler(self) -> Filler {
        match self {
            PayloadMode::Incompressible => fill_incompressible,
            PayloadMode::Compressible => fill_compressible,
        }
    }
}

/// Fill `buf` with xorshift64 output and advance the session.
///
/// The generator steps once per byte. Each byte takes six bits of the state,
/// shifted right by the count of bytes still to go in this call (mod 16).
pub fn fill_incompressible(session: &mut SessionState, buf: &mut [u8]) {
    let mut rng = session.rng;
    let mut left = buf.len();

    for byte in buf.iter_mut() {
        left -= 1;
        rng ^= rng << 21;
        rng ^= rng >> 35;
        rng ^= rng << 4;
        *byte = 0x40 | ((rng >> (left & 15)) & 0x3f) as u8;
    }

    session.rng = rng;
    session.position += buf.len();
}

/// Fill `buf` from the corpus, starting at `position % CORPUS.len()`.
pub fn fill_compressible(session: &mut SessionState, buf: &mut [u8]) {
    let mut filled = 0;

    while filled < buf.len() {
        let offset = session.position % CORPUS.len();
        let run = (CORPUS.len() - offset).min(buf.len() - filled);
        buf[filled..filled + run].copy_from_slice(&CORPUS[offset..offset + run]);
        session.position += run;
        filled += run;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_length() {
        assert_eq!(CORPUS.len(), 1337);
        assert_eq!(DEFAULT_TOTAL_SIZE, 133_700);
    }

    #[test]
    fn test_incompressible_known_output() {
        let mut session = SessionState::new();
        let mut buf = [0u8; 8];
        fill_incompressible(&mut session, &mut buf);

        assert_eq!(&buf, b"@Xf@bHQK");
        assert_eq!(session.rng, 0x144d_9cf6_0783_288b);
        assert_eq!(session.position, 8);
    }

    #[test]
    fn test_incompressible_chunked_sequence() {
        let mut session = SessionState::new();
        let mut buf = vec![0u8; 1024];
        fill_incompressible(&mut session, &mut buf);

        assert_eq!(&buf[..16], b"@HBPyEDhi\\Hn^rad");
        assert_eq!(session.rng, 0xa266_ce3d_793c_6ee2);

        fill_incompressible(&mut session, &mut buf);
        fill_incompressible(&mut session, &mut buf[..952]);
        assert_eq!(session.rng, 0x27f1_6e18_a94b_3fc5);
        assert_eq!(session.position, 3000);
    }

    #[test]
    fn test_incompressible_is_deterministic() {
        let mut a = SessionState::new();
        let mut b = SessionState::new();
        let mut buf_a = vec![0u8; 4096];
        let mut buf_b = vec![0u8; 4096];

        fill_incompressible(&mut a, &mut buf_a);
        fill_incompressible(&mut b, &mut buf_b);

        assert_eq!(buf_a, buf_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_incompressible_range() {
        let mut session = SessionState::new();
        let mut buf = vec![0u8; 10_000];
        fill_incompressible(&mut session, &mut buf);

        assert!(buf.iter().all(|&b| (0x40..=0x7f).contains(&b)));
        // Every one of the 64 symbols shows up in a buffer this size.
        let mut seen = [false; 64];
        for &b in &buf {
            seen[(b - 0x40) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_compressible_matches_corpus() {
        let mut session = SessionState::new();
        let mut out = Vec::new();
        let mut buf = vec![0u8; 1000];

        // Uneven chunks to cross the corpus boundary mid-call.
        for _ in 0..5 {
            fill_compressible(&mut session, &mut buf);
            out.extend_from_slice(&buf);
        }

        assert_eq!(session.position, 5000);
        for (k, &b) in out.iter().enumerate() {
            assert_eq!(b, CORPUS[k % CORPUS.len()], "mismatch at offset {k}");
        }
    }

    #[test]
    fn test_compressible_leaves_rng_alone() {
        let mut session = SessionState::new();
        let mut buf = vec![0u8; 2000];
        fill_compressible(&mut session, &mut buf);
        assert_eq!(session.rng, SessionState::new().rng);
    }

    #[test]
    fn test_filler_resolution() {
        let mut a = SessionState::new();
        let mut b = SessionState::new();
        let mut buf_a = [0u8; 64];
        let mut buf_b = [0u8; 64];

        (PayloadMode::Compressible.filler())(&mut a, &mut buf_a);
        fill_compressible(&mut b, &mut buf_b);
        assert_eq!(buf_a, buf_b);

        assert_eq!(PayloadMode::default(), PayloadMode::Incompressible);
    }
}
