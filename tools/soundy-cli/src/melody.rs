//! Opening ostinato of Tubular Bells, one bar of 15/8 twice over

use soundy_core::Note::{self, *};

/// Beats per minute the melody is written for
pub const TEMPO: u32 = 90;

/// Sixteenth notes
pub const MELODY: &[Note] = &[
    E4, A4, E4, B4, E4, G4, A4, E4, C5, E4, D5, E4, B4, C5, E4, //
    A4, E4, B4, E4, G4, A4, E4, C5, E4, D5, E4, B4, C5, E4, B4,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_melody_has_no_rests() {
        assert_eq!(MELODY.len(), 30);
        assert!(MELODY.iter().all(|note| note.frequency().is_some()));
    }
}
