//! The choice stream: the single source of randomness for every generated value.
//!
//! A [`ChoiceStream`] records each primitive draw as one `u64` word. Words are
//! stored in normalized form, meaning the smallest word that decodes to the
//! value that was produced, so a recorded stream replays to the same values
//! and smaller words always mean simpler values.
//!
//! During live generation the stream extends itself from a seeded
//! `ChaCha8Rng`. When replaying a fixed list of choices (a stored failure or a
//! shrink candidate) running out of words is an [`DrawError::Overrun`].

use crate::error::{DecodeError, DrawError};
use crate::strategy::Strategy;
use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

/// Default upper bound on the number of choices one example may consume.
pub const DEFAULT_MAX_CHOICES: usize = 8 * 1024;

const FRACTION_MASK: u64 = (1 << 53) - 1;

/// A labeled region of the stream, `start..end` in choice indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub label: &'static str,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// An ordered, replayable buffer of primitive draws.
#[derive(Debug, Clone)]
pub struct ChoiceStream {
    prefix: Vec<u64>,
    rng: Option<ChaCha8Rng>,
    choices: Vec<u64>,
    max_choices: usize,
    spans: Vec<Span>,
    open: Vec<usize>,
}

impl ChoiceStream {
    /// A live stream drawing fresh randomness from `rng`.
    pub fn live(rng: ChaCha8Rng, max_choices: usize) -> Self {
        Self::with_parts(Vec::new(), Some(rng), max_choices)
    }

    /// A stream that replays `choices` and overruns when they run out.
    pub fn replay(choices: &[u64]) -> Self {
        Self::with_parts(choices.to_vec(), None, choices.len())
    }

    fn with_parts(prefix: Vec<u64>, rng: Option<ChaCha8Rng>, max_choices: usize) -> Self {
        Self {
            prefix,
            rng,
            choices: Vec::new(),
            max_choices,
            spans: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Whether exhausting the prefix extends the stream instead of overrunning.
    pub fn is_live(&self) -> bool {
        self.rng.is_some()
    }

    /// Choices consumed so far, normalized.
    pub fn choices(&self) -> &[u64] {
        &self.choices
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Closes any span left open and hands back the recorded choices and spans.
    pub fn finish(mut self) -> (Vec<u64>, Vec<Span>) {
        while !self.open.is_empty() {
            self.stop_span();
        }
        (self.choices, self.spans)
    }

    /// Opens a span starting at the next choice.
    pub fn start_span(&mut self, label: &'static str) {
        let start = self.choices.len();
        self.open.push(self.spans.len());
        self.spans.push(Span {
            label,
            start,
            end: start,
            depth: self.open.len() - 1,
        });
    }

    /// Closes the innermost open span. Unbalanced calls are ignored.
    pub fn stop_span(&mut self) {
        if let Some(index) = self.open.pop() {
            self.spans[index].end = self.choices.len();
        }
    }

    /// Draws a value from `strategy` inside its own span.
    pub fn draw<S: Strategy + ?Sized>(&mut self, strategy: &S) -> Result<S::Value, DrawError> {
        self.start_span("draw");
        let result = strategy.draw(self);
        self.stop_span();
        result
    }

    fn next_word(&mut self, live: impl FnOnce(&mut ChaCha8Rng) -> u64) -> Result<u64, DrawError> {
        let index = self.choices.len();
        if index >= self.max_choices {
            return Err(DrawError::Overrun { consumed: index });
        }
        if let Some(&word) = self.prefix.get(index) {
            return Ok(word);
        }
        match self.rng.as_mut() {
            Some(rng) => Ok(live(rng)),
            None => Err(DrawError::Overrun { consumed: index }),
        }
    }

    /// Draws an integer in `min..=max`.
    ///
    /// The recorded word is an index: 0 is the value closest to zero inside
    /// the range, and larger indices alternate above and below it.
    pub fn draw_integer(&mut self, min: i128, max: i128) -> Result<i128, DrawError> {
        if min > max {
            return Err(DrawError::InvalidArgument(format!(
                "empty integer range {min}..={max}"
            )));
        }
        let width = max
            .checked_sub(min)
            .and_then(|w| u64::try_from(w).ok())
            .ok_or_else(|| {
                DrawError::InvalidArgument(format!("integer range {min}..={max} is too wide"))
            })?;

        let word = self.next_word(|rng| biased_index(rng, width))?;
        let index = match width.checked_add(1) {
            Some(count) => word % count,
            None => word,
        };
        self.choices.push(index);
        Ok(zigzag(min, max, index))
    }

    /// Draws an index in `0..len`, shrinking towards 0.
    pub fn draw_index(&mut self, len: usize) -> Result<usize, DrawError> {
        if len == 0 {
            return Err(DrawError::InvalidArgument(
                "cannot draw an index into an empty collection".to_string(),
            ));
        }
        let value = self.draw_integer(0, len as i128 - 1)?;
        Ok(value as usize)
    }

    /// Draws a boolean that is true with probability `p`.
    ///
    /// `p <= 0` and `p >= 1` still consume one choice so that the layout of
    /// the stream does not depend on the probability.
    pub fn draw_boolean(&mut self, p: f64) -> Result<bool, DrawError> {
        if p.is_nan() {
            return Err(DrawError::InvalidArgument(
                "boolean probability is NaN".to_string(),
            ));
        }
        let word = self.next_word(|rng| {
            if p <= 0.0 {
                0
            } else if p >= 1.0 {
                1
            } else {
                u64::from(rng.gen_bool(p))
            }
        })?;
        let value = if p <= 0.0 {
            false
        } else if p >= 1.0 {
            true
        } else {
            word != 0
        };
        self.choices.push(u64::from(value));
        Ok(value)
    }

    /// Draws a finite float in `min..=max`, shrinking towards `min`.
    pub fn draw_float(&mut self, min: f64, max: f64) -> Result<f64, DrawError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(DrawError::InvalidArgument(format!(
                "invalid float range {min}..={max}"
            )));
        }
        let word = self.next_word(|rng| match rng.gen_range(0..16) {
            0 => 0,
            1 => FRACTION_MASK,
            _ => rng.next_u64() & FRACTION_MASK,
        })?;
        let bits = word & FRACTION_MASK;
        self.choices.push(bits);

        let fraction = bits as f64 / FRACTION_MASK as f64;
        let value = min * (1.0 - fraction) + max * fraction;
        Ok(value.clamp(min, max))
    }

    /// Draws `n` bytes, one choice per byte.
    pub fn draw_bytes(&mut self, n: usize) -> Result<Vec<u8>, DrawError> {
        let mut bytes = Vec::with_capacity(n);
        for _ in 0..n {
            let word = self.next_word(|rng| rng.next_u64() & 0xFF)?;
            let byte = (word & 0xFF) as u8;
            self.choices.push(u64::from(byte));
            bytes.push(byte);
        }
        Ok(bytes)
    }
}

/// Live distribution over `0..=width`: usually small, sometimes anywhere.
fn biased_index(rng: &mut ChaCha8Rng, width: u64) -> u64 {
    if width == 0 {
        return 0;
    }
    if width > 0xFF && rng.gen_ratio(7, 8) {
        let bits = 64 - width.leading_zeros();
        let cap = rng.gen_range(1..=bits);
        let mask = if cap == 64 { u64::MAX } else { (1 << cap) - 1 };
        let candidate = rng.next_u64() & mask;
        if candidate <= width {
            return candidate;
        }
    }
    if width == u64::MAX {
        rng.next_u64()
    } else {
        rng.gen_range(0..=width)
    }
}

/// Maps an index to a value of `min..=max`, alternating around the value
/// closest to zero.
fn zigzag(min: i128, max: i128, index: u64) -> i128 {
    let target = 0i128.clamp(min, max);
    let above = (max - target) as u128;
    let below = (target - min) as u128;
    let k = u128::from(index);
    let paired = above.min(below);

    if k <= 2 * paired {
        if k % 2 == 1 {
            target + k.div_ceil(2) as i128
        } else {
            target - (k / 2) as i128
        }
    } else {
        let rest = (k - 2 * paired) as i128;
        if above > below {
            target + paired as i128 + rest
        } else {
            target - paired as i128 - rest
        }
    }
}

/// Shortlex order: shorter streams first, then lexicographically.
pub fn shortlex_cmp(a: &[u64], b: &[u64]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// True when `candidate` sorts strictly before `current` in shortlex order.
pub fn is_simpler(candidate: &[u64], current: &[u64]) -> bool {
    shortlex_cmp(candidate, current) == Ordering::Less
}

/// Serializes choices as unsigned LEB128 varints.
pub fn encode_choices(choices: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(choices.len());
    for &choice in choices {
        let mut value = choice;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }
    out
}

/// Inverse of [`encode_choices`].
pub fn decode_choices(bytes: &[u8]) -> Result<Vec<u64>, DecodeError> {
    let mut choices = Vec::new();
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut start = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift == 0 {
            start = i;
        }
        let low = u64::from(byte & 0x7F);
        if shift >= 64 || (shift == 63 && low > 1) {
            return Err(DecodeError::TooLong(start));
        }
        value |= low << shift;
        if byte & 0x80 == 0 {
            choices.push(value);
            value = 0;
            shift = 0;
        } else {
            shift += 7;
        }
    }

    if shift != 0 {
        return Err(DecodeError::Truncated(start));
    }
    Ok(choices)
}
