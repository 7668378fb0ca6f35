//! Frame encoding
//!
//! A frame is one fully wire-encoded event:
//!
//! ```text
//! data:<compact JSON payload>\n\n
//! ```
//!
//! Compact JSON never contains a raw newline, so the payload always fits on a
//! single `data:` line.

use bytes::Bytes;
use serde::ser::{self, Serialize};
use std::fmt;
use std::ops::Deref;

use crate::{Error, Result};

/// Field prefix of every frame. No space follows the colon.
pub const DATA_PREFIX: &[u8] = b"data:";

/// Blank line terminating every frame
pub const FRAME_TERMINATOR: &[u8] = b"\n\n";

/// One immutable, wire-encoded event.
///
/// Cloning is a reference count bump, so a single frame is shared by every
/// subscriber queue it is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    /// Wrap bytes that are already wire-encoded.
    ///
    /// No framing is added or checked.
    pub fn from_raw(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Shared handle to the underlying buffer
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encode one event into a frame.
///
/// Fails with [`Error::Encoding`] if the value cannot be represented as JSON,
/// including any non-finite float anywhere inside it. Nothing is produced on
/// failure.
pub fn encode_frame<T>(event: &T) -> Result<Frame>
where
    T: Serialize + ?Sized,
{
    // serde_json writes NaN and infinities as `null`; reject them up front
    event
        .serialize(FiniteCheck)
        .map_err(|e| Error::encoding(e.0))?;

    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(DATA_PREFIX);
    serde_json::to_writer(&mut buf, event)?;
    buf.extend_from_slice(FRAME_TERMINATOR);

    Ok(Frame(Bytes::from(buf)))
}

#[derive(Debug)]
struct CheckError(String);

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CheckError {}

impl ser::Error for CheckError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CheckError(msg.to_string())
    }
}

fn check_float(finite: bool, value: f64) -> std::result::Result<(), CheckError> {
    if finite {
        Ok(())
    } else {
        Err(CheckError(format!("non-finite number {} cannot be encoded", value)))
    }
}

/// Serializer that produces nothing and fails on the first non-finite float
struct FiniteCheck;

macro_rules! accept {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> std::result::Result<(), CheckError> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = CheckError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    }

    fn serialize_f32(self, v: f32) -> std::result::Result<(), CheckError> {
        check_float(v.is_finite(), f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> std::result::Result<(), CheckError> {
        check_float(v.is_finite(), v)
    }

    fn serialize_none(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> std::result::Result<(), CheckError> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, CheckError> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_key<T: ?Sized + Serialize>(
        &mut self,
        key: &T,
    ) -> std::result::Result<(), CheckError> {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CheckError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> std::result::Result<(), CheckError> {
        Ok(())
    }
}
