//! Strategies for primitive types and basic collections.

use crate::choice::ChoiceStream;
use crate::error::DrawError;
use crate::strategy::Strategy;
use num_traits::{Bounded, NumCast, PrimInt};
use std::marker::PhantomData;

/// Strategy for integers in an inclusive range
#[derive(Debug, Clone, Copy)]
pub struct Integers<T> {
    min: T,
    max: T,
}

impl<T> Strategy for Integers<T>
where
    T: PrimInt,
{
    type Value = T;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<T, DrawError> {
        let min = self.min.to_i128().ok_or_else(out_of_i128)?;
        let max = self.max.to_i128().ok_or_else(out_of_i128)?;
        let value = stream.draw_integer(min, max)?;
        <T as NumCast>::from(value).ok_or_else(|| {
            DrawError::InvalidArgument(format!("{value} does not fit the target type"))
        })
    }
}

fn out_of_i128() -> DrawError {
    DrawError::InvalidArgument("integer bound does not fit in i128".to_string())
}

/// Integers in `min..=max`, shrinking towards zero (or the bound closest to it)
pub fn integers<T: PrimInt>(min: T, max: T) -> Integers<T> {
    Integers { min, max }
}

/// Any value of an integer type whose full range fits in 64 bits
pub fn any_integer<T: PrimInt + Bounded>() -> Integers<T> {
    Integers {
        min: T::min_value(),
        max: T::max_value(),
    }
}

/// Strategy for booleans
#[derive(Debug, Clone, Copy)]
pub struct Booleans {
    p: f64,
}

impl Strategy for Booleans {
    type Value = bool;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<bool, DrawError> {
        stream.draw_boolean(self.p)
    }
}

/// Fair coin flips, shrinking towards `false`
pub fn booleans() -> Booleans {
    Booleans { p: 0.5 }
}

/// Booleans that are `true` with probability `p`
pub fn weighted(p: f64) -> Booleans {
    Booleans { p }
}

/// Strategy for finite floats in an inclusive range
#[derive(Debug, Clone, Copy)]
pub struct Floats {
    min: f64,
    max: f64,
}

impl Strategy for Floats {
    type Value = f64;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<f64, DrawError> {
        stream.draw_float(self.min, self.max)
    }
}

/// Floats in `min..=max`, shrinking towards `min`
pub fn floats(min: f64, max: f64) -> Floats {
    Floats { min, max }
}

/// Strategy for vectors whose length is drawn first
#[derive(Debug, Clone)]
pub struct Vecs<S> {
    element: S,
    min_size: usize,
    max_size: usize,
}

impl<S: Strategy> Strategy for Vecs<S> {
    type Value = Vec<S::Value>;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError> {
        stream.start_span("collection");
        let values = self.draw_elements(stream);
        stream.stop_span();
        values
    }
}

impl<S: Strategy> Vecs<S> {
    // The length is the first choice of the "collection" span, which lets the
    // shrinker delete an element and decrement the length together.
    fn draw_elements(&self, stream: &mut ChoiceStream) -> Result<Vec<S::Value>, DrawError> {
        let len = stream.draw_integer(self.min_size as i128, self.max_size as i128)? as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            stream.start_span("element");
            let value = self.element.draw(stream);
            stream.stop_span();
            values.push(value?);
        }
        Ok(values)
    }
}

/// Vectors of `min_size..=max_size` elements drawn from `element`
pub fn vecs<S: Strategy>(element: S, min_size: usize, max_size: usize) -> Vecs<S> {
    Vecs {
        element,
        min_size,
        max_size,
    }
}

/// Strategy for byte strings
#[derive(Debug, Clone, Copy)]
pub struct Binary {
    min_size: usize,
    max_size: usize,
}

impl Strategy for Binary {
    type Value = Vec<u8>;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<Vec<u8>, DrawError> {
        stream.start_span("collection");
        let bytes = self.draw_bytes(stream);
        stream.stop_span();
        bytes
    }
}

impl Binary {
    fn draw_bytes(&self, stream: &mut ChoiceStream) -> Result<Vec<u8>, DrawError> {
        let len = stream.draw_integer(self.min_size as i128, self.max_size as i128)? as usize;
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            stream.start_span("element");
            let byte = stream.draw_bytes(1);
            stream.stop_span();
            bytes.extend(byte?);
        }
        Ok(bytes)
    }
}

/// Byte strings of `min_size..=max_size` bytes
pub fn binary(min_size: usize, max_size: usize) -> Binary {
    Binary { min_size, max_size }
}

const PRINTABLE: u32 = 95;
const SURROGATES: u32 = 0x800;
const MAX_CHAR_INDEX: u32 = PRINTABLE + (0x10FFFF - 0x7F + 1) - SURROGATES - 1;

/// Strategy for unicode scalar values
///
/// Index 0 is `'0'`, followed by the rest of printable ASCII, then every
/// other code point. Small indices are far more likely, so text is mostly
/// ASCII with the occasional wide character.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chars;

impl Strategy for Chars {
    type Value = char;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<char, DrawError> {
        let index = stream.draw_integer(0, <i128 as From<u32>>::from(MAX_CHAR_INDEX))? as u32;
        Ok(char_at(index))
    }
}

fn char_at(index: u32) -> char {
    let code = if index < PRINTABLE {
        0x20 + (index + 16) % PRINTABLE
    } else {
        let code = index - PRINTABLE + 0x7F;
        if code >= 0xD800 { code + SURROGATES } else { code }
    };
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Unicode characters, shrinking towards `'0'`
pub fn chars() -> Chars {
    Chars
}

/// Strategy for strings built from a character strategy
#[derive(Debug, Clone)]
pub struct Text<S> {
    chars: Vecs<S>,
}

impl<S: Strategy<Value = char>> Strategy for Text<S> {
    type Value = String;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<String, DrawError> {
        Ok(self.chars.draw(stream)?.into_iter().collect())
    }
}

/// Strings of `min_len..=max_len` characters
pub fn text(min_len: usize, max_len: usize) -> Text<Chars> {
    text_from(chars(), min_len, max_len)
}

/// Strings whose characters come from `alphabet`
pub fn text_from<S: Strategy<Value = char>>(alphabet: S, min_len: usize, max_len: usize) -> Text<S> {
    Text {
        chars: vecs(alphabet, min_len, max_len),
    }
}

/// Strategy for random (version 4) UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct Uuids;

impl Strategy for Uuids {
    type Value = uuid::Uuid;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<uuid::Uuid, DrawError> {
        let bytes = stream.draw_bytes(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);
        Ok(uuid::Builder::from_random_bytes(raw).into_uuid())
    }
}

/// Version 4 UUIDs
pub fn uuids() -> Uuids {
    Uuids
}

/// Strategy for optional values
#[derive(Debug, Clone)]
pub struct Optional<S> {
    inner: S,
}

impl<S: Strategy> Strategy for Optional<S> {
    type Value = Option<S::Value>;

    fn draw(&self, stream: &mut ChoiceStream) -> Result<Self::Value, DrawError> {
        if stream.draw_boolean(0.75)? {
            stream.draw(&self.inner).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// `None`, or a value of `inner`; shrinks towards `None`
pub fn optional<S: Strategy>(inner: S) -> Optional<S> {
    Optional { inner }
}

/// Strategy producing `T::default()` without consuming choices
#[derive(Debug, Clone, Copy)]
pub struct Defaults<T>(PhantomData<fn() -> T>);

impl<T: Default> Strategy for Defaults<T> {
    type Value = T;

    fn draw(&self, _stream: &mut ChoiceStream) -> Result<T, DrawError> {
        Ok(T::default())
    }
}

/// Always `T::default()`
pub fn defaults<T: Default>() -> Defaults<T> {
    Defaults(PhantomData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn live(seed: u64) -> ChoiceStream {
        ChoiceStream::live(ChaCha8Rng::seed_from_u64(seed), 4096)
    }

    #[test]
    fn test_integers_stay_in_range() {
        let strategy = integers(-20i32, 7);
        for seed in 0..50 {
            let value = strategy.draw(&mut live(seed)).unwrap();
            assert!((-20..=7).contains(&value));
        }
    }

    #[test]
    fn test_integer_zero_choice_is_simplest() {
        let mut stream = ChoiceStream::replay(&[0]);
        assert_eq!(integers(-5i64, 5).draw(&mut stream).unwrap(), 0);

        let mut stream = ChoiceStream::replay(&[0]);
        assert_eq!(integers(10u8, 20).draw(&mut stream).unwrap(), 10);
    }

    #[test]
    fn test_any_integer_full_width() {
        let mut stream = ChoiceStream::replay(&[u64::MAX]);
        let value = any_integer::<u64>().draw(&mut stream).unwrap();
        assert_eq!(value, u64::MAX);

        let mut stream = ChoiceStream::replay(&[1]);
        assert_eq!(any_integer::<i64>().draw(&mut stream).unwrap(), 1);
    }

    #[test]
    fn test_vec_length_then_elements() {
        let strategy = vecs(integers(0u8, 9), 0, 5);
        let mut stream = ChoiceStream::replay(&[3, 1, 2, 3]);
        assert_eq!(strategy.draw(&mut stream).unwrap(), vec![1, 2, 3]);

        let elements = stream
            .spans()
            .iter()
            .filter(|span| span.label == "element")
            .count();
        assert_eq!(elements, 3);
    }

    #[test]
    fn test_vec_min_size() {
        let strategy = vecs(booleans(), 2, 4);
        let mut stream = ChoiceStream::replay(&[0, 0, 0]);
        assert_eq!(strategy.draw(&mut stream).unwrap(), vec![false, false]);
    }

    #[test]
    fn test_binary() {
        let mut stream = ChoiceStream::replay(&[2, 0xAB, 0x01]);
        assert_eq!(binary(0, 8).draw(&mut stream).unwrap(), vec![0xAB, 0x01]);
    }

    #[test]
    fn test_char_table() {
        assert_eq!(char_at(0), '0');
        assert_eq!(char_at(10), ':');
        assert_eq!(char_at(PRINTABLE - 1), '/');
        assert_eq!(char_at(PRINTABLE), '\u{7F}');
        assert_eq!(char_at(MAX_CHAR_INDEX), '\u{10FFFF}');
        // Surrogates are skipped.
        let before = PRINTABLE + (0xD7FF - 0x7F);
        assert_eq!(char_at(before), '\u{D7FF}');
        assert_eq!(char_at(before + 1), '\u{E000}');
    }

    #[test]
    fn test_chars_cover_the_whole_index_range() {
        let mut stream = ChoiceStream::replay(&[<u64 as From<_>>::from(MAX_CHAR_INDEX), 0]);
        assert_eq!(chars().draw(&mut stream).unwrap(), '\u{10FFFF}');
        assert_eq!(chars().draw(&mut stream).unwrap(), '0');
    }

    #[test]
    fn test_text_simplest_value() {
        let mut stream = ChoiceStream::replay(&[1, 0]);
        assert_eq!(text(0, 4).draw(&mut stream).unwrap(), "0");
    }

    #[test]
    fn test_text_from_alphabet() {
        let abc = crate::strategy::sampled_from(vec!['a', 'b', 'c']);
        let mut stream = ChoiceStream::replay(&[2, 2, 1]);
        assert_eq!(text_from(abc, 0, 3).draw(&mut stream).unwrap(), "cb");
    }

    #[test]
    fn test_uuids_are_version_4() {
        let id = uuids().draw(&mut live(5)).unwrap();
        assert_eq!(id.get_version_num(), 4);

        let mut zeros = ChoiceStream::replay(&[0; 16]);
        let simplest = uuids().draw(&mut zeros).unwrap();
        assert!(!simplest.is_nil());
    }

    #[test]
    fn test_optional() {
        let mut none = ChoiceStream::replay(&[0]);
        assert_eq!(optional(integers(0u8, 3)).draw(&mut none).unwrap(), None);

        let mut some = ChoiceStream::replay(&[1, 2]);
        assert_eq!(optional(integers(0u8, 3)).draw(&mut some).unwrap(), Some(2));
    }

    #[test]
    fn test_defaults_consume_nothing() {
        let mut stream = ChoiceStream::replay(&[]);
        assert_eq!(defaults::<String>().draw(&mut stream).unwrap(), "");
    }
}
