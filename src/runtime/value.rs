//! The tagged value stored in every collection slot.
//!
//! A [`Value`] occupies exactly [`SLOT_SIZE`] bytes when packed: one type
//! byte followed by a four-byte little-endian payload. The same encoding is
//! used in memory images, save files and program images.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::error::{VmError, VmResult};

/// Width of one packed slot in bytes.
pub const SLOT_SIZE: usize = 5;

const_assert_eq!(SLOT_SIZE, 1 + std::mem::size_of::<u32>());

// =============================================================================
// ObjectId
// =============================================================================

/// Handle to an object living in the [`Heap`](crate::runtime::Heap).
///
/// Handles are plain integers, so they can be stored in packed slots and
/// survive a save/restore cycle. Id `0` is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectId(u32);

impl ObjectId {
    /// The reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    pub(crate) const fn index(self) -> Option<usize> {
        match self.0 {
            0 => None,
            raw => Some(raw as usize - 1),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

// =============================================================================
// TypeTag
// =============================================================================

/// The type byte at the start of every packed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// `nil`
    Nil = 1,
    /// `true`
    True = 2,
    /// Object reference.
    Obj = 5,
    /// Property id.
    Prop = 6,
    /// 32-bit signed integer.
    Int = 7,
    /// Constant string in the program image.
    SString = 8,
    /// Self-printing string in the program image.
    DString = 9,
    /// Constant list in the program image.
    List = 10,
    /// Code offset.
    CodeOfs = 11,
    /// Function pointer.
    FuncPtr = 12,
    /// Empty placeholder.
    Empty = 13,
    /// Enumerator.
    Enum = 15,
    /// Built-in function pointer.
    BifPtr = 16,
}

impl TryFrom<u8> for TypeTag {
    type Error = VmError;

    fn try_from(byte: u8) -> VmResult<Self> {
        Ok(match byte {
            1 => Self::Nil,
            2 => Self::True,
            5 => Self::Obj,
            6 => Self::Prop,
            7 => Self::Int,
            8 => Self::SString,
            9 => Self::DString,
            10 => Self::List,
            11 => Self::CodeOfs,
            12 => Self::FuncPtr,
            13 => Self::Empty,
            15 => Self::Enum,
            16 => Self::BifPtr,
            _ => return Err(VmError::invalid_data("unknown slot type tag")),
        })
    }
}

// =============================================================================
// Value
// =============================================================================

/// A fixed-size discriminated runtime value.
///
/// The derived `PartialEq` is identity equality (same tag, same payload).
/// Semantic equality, which looks inside collections and strings, lives on
/// [`Vm::values_equal`](crate::runtime::Vm::values_equal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// `true`
    True,
    /// Empty placeholder.
    Empty,
    /// 32-bit signed integer.
    Int(i32),
    /// Reference to a heap object.
    Obj(ObjectId),
    /// Property id.
    Prop(u16),
    /// Offset of a constant string in the program image.
    SString(u32),
    /// Offset of a self-printing string in the program image.
    DString(u32),
    /// Offset of a constant list in the program image.
    List(u32),
    /// Code offset.
    CodeOfs(u32),
    /// Function pointer.
    FuncPtr(u32),
    /// Enumerator.
    Enum(u32),
    /// Built-in function pointer.
    BifPtr {
        /// Function set index.
        set: u16,
        /// Index within the set.
        index: u16,
    },
}

impl Value {
    /// Converts a boolean to `true` or `nil`.
    #[inline]
    #[must_use]
    pub const fn logical(flag: bool) -> Self {
        if flag { Self::True } else { Self::Nil }
    }

    /// Builds an integer value from a collection length or index.
    ///
    /// Collection sizes never exceed 65535, so the conversion cannot fail in
    /// practice; anything larger saturates.
    #[inline]
    #[must_use]
    pub fn from_count(count: usize) -> Self {
        Self::Int(i32::try_from(count).unwrap_or(i32::MAX))
    }

    /// Returns the slot type byte for this value.
    #[must_use]
    pub const fn type_tag(&self) -> TypeTag {
        match self {
            Self::Nil => TypeTag::Nil,
            Self::True => TypeTag::True,
            Self::Empty => TypeTag::Empty,
            Self::Int(_) => TypeTag::Int,
            Self::Obj(_) => TypeTag::Obj,
            Self::Prop(_) => TypeTag::Prop,
            Self::SString(_) => TypeTag::SString,
            Self::DString(_) => TypeTag::DString,
            Self::List(_) => TypeTag::List,
            Self::CodeOfs(_) => TypeTag::CodeOfs,
            Self::FuncPtr(_) => TypeTag::FuncPtr,
            Self::Enum(_) => TypeTag::Enum,
            Self::BifPtr { .. } => TypeTag::BifPtr,
        }
    }

    /// Returns `true` for `nil`.
    #[inline]
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns the integer payload, if this is an integer.
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the referenced object, if this is an object reference.
    #[inline]
    #[must_use]
    pub const fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Obj(id) => Some(*id),
            _ => None,
        }
    }

    /// Callback results count as true unless they are `nil` or integer zero.
    #[inline]
    #[must_use]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Int(0))
    }

    /// Requires an integer and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for any other value.
    pub fn expect_int(&self) -> VmResult<i32> {
        match self {
            Self::Int(value) => Ok(*value),
            _ => Err(VmError::wrong_type("integer")),
        }
    }

    // -------------------------------------------------------------------------
    // Slot codec
    // -------------------------------------------------------------------------

    /// Packs this value into a five-byte slot.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn to_slot(&self) -> [u8; SLOT_SIZE] {
        let payload: u32 = match *self {
            Self::Nil | Self::True | Self::Empty => 0,
            Self::Int(value) => value as u32,
            Self::Obj(id) => id.raw(),
            Self::Prop(prop) => u32::from(prop),
            Self::SString(offset)
            | Self::DString(offset)
            | Self::List(offset)
            | Self::CodeOfs(offset)
            | Self::FuncPtr(offset)
            | Self::Enum(offset) => offset,
            Self::BifPtr { set, index } => u32::from(set) | (u32::from(index) << 16),
        };
        let mut slot = [0u8; SLOT_SIZE];
        slot[0] = self.type_tag() as u8;
        slot[1..].copy_from_slice(&payload.to_le_bytes());
        slot
    }

    /// Writes this value into the first [`SLOT_SIZE`] bytes of `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if `buffer` is too short.
    pub fn write_slot(&self, buffer: &mut [u8]) -> VmResult<()> {
        let target = buffer
            .get_mut(..SLOT_SIZE)
            .ok_or(VmError::invalid_data("slot buffer too short"))?;
        target.copy_from_slice(&self.to_slot());
        Ok(())
    }

    /// Unpacks a value from the first [`SLOT_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if fewer than five bytes are given or
    /// the type byte is unknown.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn from_slot(bytes: &[u8]) -> VmResult<Self> {
        let slot = bytes
            .get(..SLOT_SIZE)
            .ok_or(VmError::invalid_data("truncated slot"))?;
        let tag = TypeTag::try_from(slot[0])?;
        let payload = u32::from_le_bytes([slot[1], slot[2], slot[3], slot[4]]);
        Ok(match tag {
            TypeTag::Nil => Self::Nil,
            TypeTag::True => Self::True,
            TypeTag::Empty => Self::Empty,
            TypeTag::Int => Self::Int(payload as i32),
            TypeTag::Obj => Self::Obj(ObjectId::from_raw(payload)),
            TypeTag::Prop => Self::Prop(payload as u16),
            TypeTag::SString => Self::SString(payload),
            TypeTag::DString => Self::DString(payload),
            TypeTag::List => Self::List(payload),
            TypeTag::CodeOfs => Self::CodeOfs(payload),
            TypeTag::FuncPtr => Self::FuncPtr(payload),
            TypeTag::Enum => Self::Enum(payload),
            TypeTag::BifPtr => Self::BifPtr {
                set: payload as u16,
                index: (payload >> 16) as u16,
            },
        })
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Self::logical(flag)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Obj(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(formatter, "nil"),
            Self::True => write!(formatter, "true"),
            Self::Empty => write!(formatter, "<empty>"),
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Obj(id) => write!(formatter, "{id}"),
            Self::Prop(prop) => write!(formatter, "&{prop}"),
            Self::SString(offset) => write!(formatter, "<sstring@{offset}>"),
            Self::DString(offset) => write!(formatter, "<dstring@{offset}>"),
            Self::List(offset) => write!(formatter, "<list@{offset}>"),
            Self::CodeOfs(offset) => write!(formatter, "<code@{offset}>"),
            Self::FuncPtr(offset) => write!(formatter, "<func@{offset}>"),
            Self::Enum(value) => write!(formatter, "<enum {value}>"),
            Self::BifPtr { set, index } => write!(formatter, "<bif {set}:{index}>"),
        }
    }
}
