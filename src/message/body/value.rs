//! Value tuples.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{convert::TryInto, fmt, ops::Range};

use anyhow::{anyhow, Context};

use crate::{
    message::{
        traits::{FromBytes, ToBytes},
        utils::range,
        DecodeError,
    },
    PeerId,
    Round,
};

const ROUND_RANGE: Range<usize> = range(0, 4);
const VALUE_COUNT_RANGE: Range<usize> = range(ROUND_RANGE.end, 4);
const VALUE_LENGTH: usize = 8;
const PROXY_COUNT_LENGTH: usize = 4;
const PROXY_LENGTH: usize = 4;

/// A fixed point number with 16 fractional bits, used for meter readings.
///
/// Readings are aggregated by summation, which must give the same result on every machine
/// regardless of the order in which contributions arrive, so floating point numbers are never
/// put on the wire.
///
/// ```rust
/// # use pddm::message::FixedPoint;
/// let reading = FixedPoint::from_f64(42.5);
/// assert_eq!(reading.to_bits(), 42 * 65536 + 32768);
/// assert_eq!(reading.to_f64(), 42.5);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedPoint(i64);

impl FixedPoint {
    /// The number of fractional bits.
    pub const FRACTIONAL_BITS: u32 = 16;

    /// Converts a floating point number, rounding to the nearest representable value.
    pub fn from_f64(value: f64) -> Self {
        Self((value * (1_i64 << Self::FRACTIONAL_BITS) as f64).round() as i64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1_i64 << Self::FRACTIONAL_BITS) as f64
    }

    /// Creates a fixed point number from its raw representation.
    pub fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    /// Returns the raw representation.
    pub fn to_bits(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// A wrapper around a buffer that contains a [`ValueTuple`].
///
/// ```no_rust
/// +-------------+-------------+--------------------+-------------+--------------------+
/// | round (i32) | n (u32)     | n values (i64)     | m (u32)     | m proxies (i32)    |
/// +-------------+-------------+--------------------+-------------+--------------------+
/// ```
///
/// # Examples
/// ```rust
/// # use pddm::message::ValueTupleBuffer;
/// let mut bytes = 7_i32.to_be_bytes().to_vec(); // round
/// bytes.extend(&1_u32.to_be_bytes()); // one value
/// bytes.extend(&(42_i64 << 16).to_be_bytes());
/// bytes.extend(&2_u32.to_be_bytes()); // two proxies
/// bytes.extend(&1_i32.to_be_bytes());
/// bytes.extend(&2_i32.to_be_bytes());
///
/// let buffer = ValueTupleBuffer::new(&bytes).unwrap();
/// assert_eq!(buffer.round(), 7);
/// assert_eq!(buffer.value_count(), 1);
/// assert_eq!(buffer.proxy_count(), 2);
/// assert_eq!(buffer.length(), bytes.len());
/// ```
pub struct ValueTupleBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> ValueTupleBuffer<T> {
    /// Performs bound checks for the various fields on `bytes` and returns a new
    /// [`ValueTupleBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are shorter than the lengths declared by the count fields.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid ValueTupleBuffer")?;
        Ok(buffer)
    }

    /// Returns a [`ValueTupleBuffer`] without performing any bound checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < VALUE_COUNT_RANGE.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                VALUE_COUNT_RANGE.end
            ));
        }
        let proxy_count_end = (self.value_count() as usize)
            .checked_mul(VALUE_LENGTH)
            .and_then(|values| values.checked_add(VALUE_COUNT_RANGE.end + PROXY_COUNT_LENGTH))
            .ok_or_else(|| anyhow!("invalid value count: {}", self.value_count()))?;
        if len < proxy_count_end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                proxy_count_end
            ));
        }
        let end = (self.proxy_count() as usize)
            .checked_mul(PROXY_LENGTH)
            .and_then(|proxies| proxies.checked_add(proxy_count_end))
            .ok_or_else(|| anyhow!("invalid proxy count: {}", self.proxy_count()))?;
        if len < end {
            return Err(anyhow!("invalid buffer length: {} < {}", len, end));
        }
        Ok(())
    }

    /// Gets the round field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn round(&self) -> Round {
        // safe unwrap: the slice is exactly 4 bytes long
        Round::from_be_bytes(self.inner.as_ref()[ROUND_RANGE].try_into().unwrap())
    }

    /// Gets the number of values.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn value_count(&self) -> u32 {
        // safe unwrap: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[VALUE_COUNT_RANGE].try_into().unwrap())
    }

    /// Gets the number of proxies.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn proxy_count(&self) -> u32 {
        let range = self.proxy_count_range();
        // safe unwrap: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[range].try_into().unwrap())
    }

    /// The length in bytes of the value tuple contained in the buffer.
    ///
    /// # Panics
    /// This may panic if the buffer has not been checked before.
    pub fn length(&self) -> usize {
        self.proxies_range().end
    }

    fn values_range(&self) -> Range<usize> {
        range(
            VALUE_COUNT_RANGE.end,
            self.value_count() as usize * VALUE_LENGTH,
        )
    }

    fn proxy_count_range(&self) -> Range<usize> {
        range(self.values_range().end, PROXY_COUNT_LENGTH)
    }

    fn proxies_range(&self) -> Range<usize> {
        range(
            self.proxy_count_range().end,
            self.proxy_count() as usize * PROXY_LENGTH,
        )
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> ValueTupleBuffer<&'a T> {
    /// Gets the encoded values.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn values(&self) -> &'a [u8] {
        &self.inner.as_ref()[self.values_range()]
    }

    /// Gets the encoded proxy ids.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn proxies(&self) -> &'a [u8] {
        &self.inner.as_ref()[self.proxies_range()]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> ValueTupleBuffer<T> {
    /// Sets the round field.
    pub fn set_round(&mut self, round: Round) {
        self.inner.as_mut()[ROUND_RANGE].copy_from_slice(&round.to_be_bytes());
    }

    /// Sets the number of values. This must be set before accessing the fields that follow.
    pub fn set_value_count(&mut self, count: u32) {
        self.inner.as_mut()[VALUE_COUNT_RANGE].copy_from_slice(&count.to_be_bytes());
    }

    /// Sets the number of proxies. This must be set before accessing the proxies.
    ///
    /// # Panics
    /// Panics if the value count has not been set before.
    pub fn set_proxy_count(&mut self, count: u32) {
        let range = self.proxy_count_range();
        self.inner.as_mut()[range].copy_from_slice(&count.to_be_bytes());
    }

    /// Gets a mutable reference to the values field.
    pub fn values_mut(&mut self) -> &mut [u8] {
        let range = self.values_range();
        &mut self.inner.as_mut()[range]
    }

    /// Gets a mutable reference to the proxies field.
    pub fn proxies_mut(&mut self) -> &mut [u8] {
        let range = self.proxies_range();
        &mut self.inner.as_mut()[range]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
/// A reading of a meter for a given round, along with the proxies that relay it.
///
/// # Examples
/// ```rust
/// # use pddm::message::{FixedPoint, FromBytes, ToBytes, ValueTuple};
/// let value = ValueTuple::new(7, vec![FixedPoint::from_f64(42.5)], vec![1, 2]);
/// let bytes = value.to_vec();
/// assert_eq!(bytes.len(), value.buffer_length());
/// assert_eq!(ValueTuple::from_byte_slice(&bytes).unwrap(), value);
/// ```
pub struct ValueTuple {
    /// The round the reading belongs to.
    pub round: Round,
    /// The readings.
    pub value: Vec<FixedPoint>,
    /// The ids of the meters that relay this reading to the utility.
    pub proxies: Vec<PeerId>,
}

impl ValueTuple {
    pub fn new(round: Round, value: Vec<FixedPoint>, proxies: Vec<PeerId>) -> Self {
        Self {
            round,
            value,
            proxies,
        }
    }
}

impl ToBytes for ValueTuple {
    fn buffer_length(&self) -> usize {
        VALUE_COUNT_RANGE.end
            + self.value.len() * VALUE_LENGTH
            + PROXY_COUNT_LENGTH
            + self.proxies.len() * PROXY_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        let mut writer = ValueTupleBuffer::new_unchecked(buffer.as_mut());
        writer.set_round(self.round);
        writer.set_value_count(self.value.len() as u32);
        for (chunk, value) in writer
            .values_mut()
            .chunks_exact_mut(VALUE_LENGTH)
            .zip(&self.value)
        {
            chunk.copy_from_slice(&value.to_bits().to_be_bytes());
        }
        writer.set_proxy_count(self.proxies.len() as u32);
        for (chunk, proxy) in writer
            .proxies_mut()
            .chunks_exact_mut(PROXY_LENGTH)
            .zip(&self.proxies)
        {
            chunk.copy_from_slice(&proxy.to_be_bytes());
        }
        self.buffer_length()
    }
}

impl FromBytes for ValueTuple {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = ValueTupleBuffer::new(buffer.as_ref())?;
        // safe unwraps: the chunks have exactly the requested length
        let value = reader
            .values()
            .chunks_exact(VALUE_LENGTH)
            .map(|chunk| FixedPoint::from_bits(i64::from_be_bytes(chunk.try_into().unwrap())))
            .collect();
        let proxies = reader
            .proxies()
            .chunks_exact(PROXY_LENGTH)
            .map(|chunk| PeerId::from_be_bytes(chunk.try_into().unwrap()))
            .collect();
        Ok(Self {
            round: reader.round(),
            value,
            proxies,
        })
    }
}

impl fmt::Display for ValueTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.value.iter().map(ToString::to_string).collect();
        write!(
            f,
            "({}, [{}], {:?})",
            self.round,
            values.join(", "),
            self.proxies
        )
    }
}
