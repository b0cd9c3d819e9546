//! Buffer-backed field view.
//!
//! An element's wire layout is the sequence of declarations made on a
//! [`FieldCursor`]. The same declaration code runs in three modes:
//!
//! - `Build`: every field is zero-initialized (the TLV tag is written) and
//!   the cursor advances.
//! - `Parse`: the cursor advances over bytes already on the wire; the TLV
//!   tag is checked and the list entry count is derived from the length.
//! - `Measure`: nothing is touched, only the size is computed. Used to check
//!   capacity before a build writes anything.
//!
//! Values are kept in host order while a message is built and converted to
//! wire order (big-endian) in place when it is finalized.

use std::marker::PhantomData;

use tracing::trace;

use crate::element::{ElementRef, TlvHeader};
use crate::error::{Result, TlvError};

/// Access mode of a [`FieldCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Declare-and-zero.
    Build,
    /// Declare-and-view.
    Parse,
    /// Size-only dry run.
    Measure,
}

/// A fixed-size value stored in a message buffer.
pub trait WireType: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes in host order.
    fn read(bytes: &[u8]) -> Self;

    /// Encode into exactly `SIZE` bytes in host order.
    fn write(&self, bytes: &mut [u8]);

    /// Convert `SIZE` bytes in place between host and wire order.
    ///
    /// Must be self-inverse.
    fn swap(bytes: &mut [u8]);
}

/// Host/wire conversion for one multi-byte scalar.
#[inline]
pub fn swap_scalar(bytes: &mut [u8]) {
    if cfg!(target_endian = "little") {
        bytes.reverse();
    }
}

macro_rules! scalar_wire_type {
    ($($ty:ty),*) => {
        $(
            impl WireType for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn read(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_ne_bytes(raw)
                }

                fn write(&self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
                }

                fn swap(bytes: &mut [u8]) {
                    swap_scalar(&mut bytes[..Self::SIZE]);
                }
            }
        )*
    };
}

scalar_wire_type!(u16, u32, u64);

impl WireType for u8 {
    const SIZE: usize = 1;

    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = *self;
    }

    fn swap(_bytes: &mut [u8]) {}
}

impl WireType for bool {
    const SIZE: usize = 1;

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }

    fn swap(_bytes: &mut [u8]) {}
}

impl<const N: usize> WireType for [u8; N] {
    const SIZE: usize = N;

    fn read(bytes: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        out
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[..N].copy_from_slice(self);
    }

    fn swap(_bytes: &mut [u8]) {}
}

/// Declare a composite record whose fields are all [`WireType`]s.
///
/// The record is laid out packed, fields in declaration order, and swaps
/// field by field. Records nest: a field may itself be a record.
#[macro_export]
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty ),*
        }

        impl $crate::field::WireType for $name {
            const SIZE: usize = 0 $( + <$ty as $crate::field::WireType>::SIZE )*;

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn read(bytes: &[u8]) -> Self {
                let mut at = 0usize;
                $(
                    let len = <$ty as $crate::field::WireType>::SIZE;
                    let $field = <$ty as $crate::field::WireType>::read(&bytes[at..at + len]);
                    at += len;
                )*
                Self { $( $field ),* }
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn write(&self, bytes: &mut [u8]) {
                let mut at = 0usize;
                $(
                    let len = <$ty as $crate::field::WireType>::SIZE;
                    $crate::field::WireType::write(&self.$field, &mut bytes[at..at + len]);
                    at += len;
                )*
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn swap(bytes: &mut [u8]) {
                let mut at = 0usize;
                $(
                    let len = <$ty as $crate::field::WireType>::SIZE;
                    <$ty as $crate::field::WireType>::swap(&mut bytes[at..at + len]);
                    at += len;
                )*
            }
        }
    };
}

/// Handle to one fixed field of an element.
///
/// Holds the owning element index and the byte offset, never a reference;
/// read and write it through the owning [`Cmdu`](crate::Cmdu).
#[derive(Debug, PartialEq, Eq)]
pub struct Field<T> {
    pub(crate) element: usize,
    pub(crate) offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> Field<T> {
    pub(crate) fn new(element: usize, offset: usize) -> Self {
        Self {
            element,
            offset,
            _marker: PhantomData,
        }
    }

    /// Byte offset of the field inside the message buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Handle to the variable-length trailing list of an element.
#[derive(Debug, PartialEq, Eq)]
pub struct List<T> {
    pub(crate) element: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for List<T> {}

impl<T> List<T> {
    pub(crate) fn new(element: usize) -> Self {
        Self {
            element,
            _marker: PhantomData,
        }
    }
}

/// One declared fixed field, kept for endianness conversion.
#[derive(Clone, Copy)]
pub(crate) struct FieldSpan {
    pub offset: usize,
    pub size: usize,
    pub swap: fn(&mut [u8]),
}

#[derive(Clone, Copy)]
pub(crate) struct ListLayout {
    pub offset: usize,
    pub entry_size: usize,
    pub count: usize,
    pub swap: fn(&mut [u8]),
}

#[derive(Clone, Copy)]
pub(crate) enum Trailing {
    None,
    List(ListLayout),
    Nested { offset: usize, len: usize },
}

/// Result of walking one element layout.
#[derive(Clone)]
pub(crate) struct ElementLayout {
    pub start: usize,
    pub end: usize,
    pub tag: Option<u8>,
    pub length_offset: Option<usize>,
    pub body_start: usize,
    pub spans: Vec<FieldSpan>,
    pub required: Vec<usize>,
    pub trailing: Trailing,
}

/// Cursor that turns a sequence of field declarations into a wire layout.
pub struct FieldCursor<'b> {
    buf: &'b mut [u8],
    mode: Mode,
    element: usize,
    start: usize,
    pos: usize,
    limit: usize,
    tag: Option<u8>,
    length_offset: Option<usize>,
    body_start: usize,
    spans: Vec<FieldSpan>,
    required: Vec<usize>,
    trailing: Trailing,
}

impl<'b> FieldCursor<'b> {
    pub(crate) fn new(
        buf: &'b mut [u8],
        mode: Mode,
        element: usize,
        start: usize,
        limit: usize,
    ) -> Self {
        Self {
            buf,
            mode,
            element,
            start,
            pos: start,
            limit,
            tag: None,
            length_offset: None,
            body_start: start,
            spans: Vec::new(),
            required: Vec::new(),
            trailing: Trailing::None,
        }
    }

    /// Mode this cursor walks in.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Handle of the element being declared.
    pub fn element_ref(&self) -> ElementRef {
        ElementRef(self.element)
    }

    /// Current absolute position in the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Declare the 1-byte type tag and the 2-byte length of a TLV.
    ///
    /// Must be the first declaration. In parse mode the tag on the wire is
    /// checked before anything else is read.
    pub fn tlv_header(&mut self, tag: u8) -> Result<TlvHeader> {
        if self.pos != self.start {
            return Err(TlvError::Malformed("TLV header must be declared first"));
        }
        if self.mode == Mode::Parse {
            if self.pos >= self.limit {
                return Err(TlvError::OutOfSpace {
                    requested: 1,
                    remaining: 0,
                });
            }
            let found = self.buf[self.pos];
            if found != tag {
                return Err(TlvError::TypeMismatch {
                    expected: tag,
                    found,
                });
            }
        }

        let type_offset = self.claim(1)?;
        let length_offset = match self.claim(2) {
            Ok(offset) => offset,
            Err(err) => {
                self.pos = type_offset;
                return Err(err);
            }
        };
        if self.mode == Mode::Build {
            self.buf[type_offset] = tag;
            self.buf[length_offset..length_offset + 2].fill(0);
        }

        self.tag = Some(tag);
        self.length_offset = Some(length_offset);
        self.body_start = self.pos;
        self.spans.push(FieldSpan {
            offset: length_offset,
            size: 2,
            swap: <u16 as WireType>::swap,
        });

        Ok(TlvHeader {
            element: ElementRef(self.element),
            tag: Field::new(self.element, type_offset),
            length: Field::new(self.element, length_offset),
        })
    }

    /// Declare a fixed field.
    pub fn field<T: WireType>(&mut self) -> Result<Field<T>> {
        self.ensure_open()?;
        let offset = self.claim(T::SIZE)?;
        if self.mode == Mode::Build {
            self.buf[offset..offset + T::SIZE].fill(0);
        }
        self.spans.push(FieldSpan {
            offset,
            size: T::SIZE,
            swap: T::swap,
        });
        Ok(Field::new(self.element, offset))
    }

    /// Declare a fixed field that must be written before the element is
    /// finalized.
    pub fn required<T: WireType>(&mut self) -> Result<Field<T>> {
        let field = self.field::<T>()?;
        self.required.push(field.offset);
        Ok(field)
    }

    /// Declare the trailing list of uniform entries.
    ///
    /// Starts empty in build mode. In parse mode the entry count is
    /// `(length - fixed) / entry size`; leftover bytes too short for another
    /// entry stay inside the element and are ignored.
    pub fn list<T: WireType>(&mut self) -> Result<List<T>> {
        self.ensure_open()?;
        if T::SIZE == 0 {
            return Err(TlvError::Malformed("list entries must not be zero-sized"));
        }
        let offset = self.pos;
        let count = if self.mode == Mode::Parse {
            let remainder = self.parsed_remainder()?;
            self.claim(remainder)?;
            remainder / T::SIZE
        } else {
            0
        };
        self.trailing = Trailing::List(ListLayout {
            offset,
            entry_size: T::SIZE,
            count,
            swap: T::swap,
        });
        Ok(List::new(self.element))
    }

    /// Declare that the rest of the element holds nested child elements.
    pub fn nested(&mut self) -> Result<()> {
        self.ensure_open()?;
        let offset = self.pos;
        let len = if self.mode == Mode::Parse {
            let remainder = self.parsed_remainder()?;
            self.claim(remainder)?;
            remainder
        } else {
            0
        };
        self.trailing = Trailing::Nested { offset, len };
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<ElementLayout> {
        if self.mode == Mode::Parse
            && matches!(self.trailing, Trailing::None)
            && self.length_offset.is_some()
        {
            let rest = self.parsed_remainder()?;
            if rest > 0 {
                trace!(element = self.element, rest, "skipping undeclared TLV bytes");
                self.claim(rest)?;
            }
        }
        Ok(ElementLayout {
            start: self.start,
            end: self.pos,
            tag: self.tag,
            length_offset: self.length_offset,
            body_start: self.body_start,
            spans: self.spans,
            required: self.required,
            trailing: self.trailing,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        match self.trailing {
            Trailing::None => Ok(()),
            _ => Err(TlvError::Malformed(
                "no declaration may follow a variable-length part",
            )),
        }
    }

    fn claim(&mut self, size: usize) -> Result<usize> {
        let offset = self.pos;
        if self.mode != Mode::Measure {
            let remaining = self.limit.saturating_sub(self.pos);
            if size > remaining {
                return Err(TlvError::OutOfSpace {
                    requested: size,
                    remaining,
                });
            }
        }
        self.pos += size;
        Ok(offset)
    }

    /// Bytes of the declared TLV length not covered by fixed fields yet.
    fn parsed_remainder(&self) -> Result<usize> {
        let length_offset = self.length_offset.ok_or(TlvError::Malformed(
            "variable-length part requires a TLV header",
        ))?;
        // Still in wire order: the element is swapped only after its layout is walked.
        let declared =
            u16::from_be_bytes([self.buf[length_offset], self.buf[length_offset + 1]]) as usize;
        let consumed = self.pos - self.body_start;
        declared
            .checked_sub(consumed)
            .ok_or(TlvError::Malformed("declared length shorter than fixed fields"))
    }
}

/// Insert `span` zeroed bytes at `at`, shifting `buf[at..end]` right.
///
/// `end` is the end of the occupied region. Fails without touching the
/// buffer when the shifted tail would not fit.
pub fn insert_span(buf: &mut [u8], at: usize, span: usize, end: usize) -> Result<()> {
    if at > end || end > buf.len() {
        return Err(TlvError::Malformed(
            "insertion point outside the occupied region",
        ));
    }
    let remaining = buf.len() - end;
    if span > remaining {
        return Err(TlvError::OutOfSpace {
            requested: span,
            remaining,
        });
    }
    buf.copy_within(at..end, at + span);
    buf[at..at + span].fill(0);
    Ok(())
}
