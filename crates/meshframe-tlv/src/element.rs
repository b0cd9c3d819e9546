//! Structured message elements.
//!
//! An element is one TLV (or the CMDU header record) living inside a
//! [`Cmdu`](crate::Cmdu) buffer. Element types are plain structs of handles
//! produced by [`Element::layout`]; all state that changes after creation
//! (list entry count, byte order, finalize phase) lives in the container.

use crate::field::{ElementLayout, Field, FieldCursor, ListLayout, Trailing};
use crate::error::Result;
use crate::tlvs::TlvType;

/// Index of an element inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementRef(pub(crate) usize);

impl ElementRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handles to the type tag and length field of a TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    pub element: ElementRef,
    pub tag: Field<u8>,
    pub length: Field<u16>,
}

/// A structure declared over a message buffer.
///
/// `layout` is the single description of the wire layout. It runs in build
/// mode when the element is added and in parse mode when it is read back, so
/// the two can never disagree.
pub trait Element: Sized {
    /// Declare every field, in wire order.
    fn layout(cursor: &mut FieldCursor<'_>) -> Result<Self>;

    /// Handle of this element in its container.
    fn element(&self) -> ElementRef;
}

/// An element that starts with a type tag and a 16-bit length.
pub trait TlvElement: Element {
    const TYPE: TlvType;

    fn header(&self) -> TlvHeader;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Constructing,
    Finalized,
    Parsed,
}

/// Per-element bookkeeping kept by the container.
pub(crate) struct ElementState {
    pub layout: ElementLayout,
    pub parent: Option<usize>,
    /// Value of the container allocation-order counter when the element was added.
    pub order: u64,
    pub phase: Phase,
    /// Bytes are currently in wire order.
    pub swapped: bool,
    pub written: Vec<bool>,
    /// Parse mode: next unread byte of the nested region.
    pub child_pos: usize,
}

impl ElementState {
    pub fn new(layout: ElementLayout, parent: Option<usize>, order: u64, phase: Phase) -> Self {
        let written = vec![false; layout.required.len()];
        let child_pos = match layout.trailing {
            Trailing::Nested { offset, .. } => offset,
            _ => layout.end,
        };
        Self {
            layout,
            parent,
            order,
            phase,
            swapped: phase == Phase::Parsed,
            written,
            child_pos,
        }
    }

    pub fn len(&self) -> usize {
        self.layout.end - self.layout.start
    }

    pub fn body_len(&self) -> usize {
        self.layout.end - self.layout.body_start
    }

    pub fn list(&self) -> Option<&ListLayout> {
        match &self.layout.trailing {
            Trailing::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn list_mut(&mut self) -> Option<&mut ListLayout> {
        match &mut self.layout.trailing {
            Trailing::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn nested_end(&self) -> Option<usize> {
        match self.layout.trailing {
            Trailing::Nested { offset, len } => Some(offset + len),
            _ => None,
        }
    }

    pub fn mark_written(&mut self, offset: usize) {
        if let Some(slot) = self.layout.required.iter().position(|&o| o == offset) {
            self.written[slot] = true;
        }
    }

    pub fn all_required_written(&self) -> bool {
        self.written.iter().all(|&w| w)
    }
}
