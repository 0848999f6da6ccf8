//! Instrument selection: the widening acceptance band around the target
//! price (cycle start) and the reference-price pick (entry).

use rust_decimal::Decimal;

use crate::domain::{InstrumentBook, OptionKind};

/// Result of a successful band selection
#[derive(Debug, Clone)]
pub struct BandSelection {
    /// Band width at which both kinds were first represented
    pub band: Decimal,
    /// Tokens inside the accepted band
    pub tokens: Vec<u32>,
}

/// Widen the acceptance band around `anchor` in `step` increments until at
/// least one call and one put lie inside, then return the accepted set.
///
/// Returns `None` when the observed instruments cannot satisfy both kinds no
/// matter how wide the band grows (e.g. a one-sided batch).
pub fn select_universe(
    book: &InstrumentBook,
    anchor: Decimal,
    step: Decimal,
) -> Option<BandSelection> {
    if step <= Decimal::ZERO {
        return None;
    }

    let deviations: Vec<(u32, OptionKind, Decimal)> = book
        .iter()
        .map(|inst| (inst.token, inst.kind, (inst.last - anchor).abs()))
        .collect();

    let max_deviation = deviations.iter().map(|(_, _, dev)| *dev).max()?;

    let mut band = step;
    loop {
        let accepted: Vec<&(u32, OptionKind, Decimal)> = deviations
            .iter()
            .filter(|(_, _, dev)| *dev <= band)
            .collect();

        let has_call = accepted.iter().any(|(_, k, _)| *k == OptionKind::Call);
        let has_put = accepted.iter().any(|(_, k, _)| *k == OptionKind::Put);

        if has_call && has_put {
            return Some(BandSelection {
                band,
                tokens: accepted.iter().map(|(t, _, _)| *t).collect(),
            });
        }

        if band >= max_deviation {
            return None;
        }
        band += step;
    }
}

/// The instrument of `kind` whose last price is closest to, but not above,
/// the reference price. Ties resolve to the lower token.
pub fn closest_below(book: &InstrumentBook, kind: OptionKind, reference: Decimal) -> Option<u32> {
    book.iter()
        .filter(|inst| inst.kind == kind && inst.last <= reference)
        .max_by_key(|inst| (inst.last, std::cmp::Reverse(inst.token)))
        .map(|inst| inst.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Tick;
    use rust_decimal_macros::dec;

    fn book_of(ticks: &[(u32, &str, Decimal)]) -> InstrumentBook {
        let mut book = InstrumentBook::new();
        for (token, symbol, price) in ticks {
            book.upsert(&Tick::new(*token, *symbol, *price));
        }
        book
    }

    #[test]
    fn test_band_widens_until_both_kinds() {
        // CE at 150 (dev 50), PE at 100 (dev 100), CE at 300 (dev 100)
        let book = book_of(&[
            (1, "X22400CE", dec!(150)),
            (2, "X22400PE", dec!(100)),
            (3, "X23000CE", dec!(300)),
        ]);

        let selection = select_universe(&book, dec!(200), dec!(25)).unwrap();

        // 25 → 50 → 75 → 100: the put only enters at 100
        assert_eq!(selection.band, dec!(100));
        assert_eq!(selection.tokens, vec![1, 2, 3]);
    }

    #[test]
    fn test_one_sided_batch_never_selects() {
        let book = book_of(&[
            (1, "X22400CE", dec!(150)),
            (3, "X23000CE", dec!(300)),
        ]);

        assert!(select_universe(&book, dec!(200), dec!(25)).is_none());
    }

    #[test]
    fn test_empty_book() {
        let book = InstrumentBook::new();
        assert!(select_universe(&book, dec!(200), dec!(25)).is_none());
    }

    #[test]
    fn test_closest_below_excludes_above() {
        let book = book_of(&[
            (1, "X22400CE", dec!(195)),
            (2, "X22500CE", dec!(205)),
            (3, "X22600CE", dec!(180)),
            (4, "X22400PE", dec!(190)),
        ]);

        // 195 is closest to 200 without exceeding it; 205 is out
        assert_eq!(closest_below(&book, OptionKind::Call, dec!(200)), Some(1));
        assert_eq!(closest_below(&book, OptionKind::Put, dec!(200)), Some(4));
    }

    #[test]
    fn test_closest_below_none_when_all_above() {
        let book = book_of(&[(2, "X22500CE", dec!(205))]);
        assert_eq!(closest_below(&book, OptionKind::Call, dec!(200)), None);
    }
}
