//! The message container: a CMDU header followed by TLVs in one buffer.

use std::fmt;
use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::element::{Element, ElementRef, ElementState, Phase};
use crate::error::{Result, TlvError};
use crate::field::{insert_span, ElementLayout, Field, FieldCursor, List, Mode, WireType};

/// Size of the CMDU header record.
pub const CMDU_HEADER_LENGTH: usize = 10;
/// Size of a TLV type tag plus its length field.
pub const TLV_HEADER_LENGTH: usize = 3;

/// Values up to this size are byte-swapped on the stack when read.
const READ_SCRATCH_SIZE: usize = 64;

/// Handles to the CMDU header record.
///
/// Wire layout: version, reserved, message type, message id, fragment id,
/// flags, total length (header included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmduHeader {
    element: ElementRef,
    pub message_version: Field<u8>,
    pub reserved: Field<u8>,
    pub message_type: Field<u16>,
    pub message_id: Field<u16>,
    pub fragment_id: Field<u8>,
    pub flags: Field<u8>,
    pub length: Field<u16>,
}

impl CmduHeader {
    pub const LAST_FRAGMENT: u8 = 0x80;
    pub const RELAY_INDICATOR: u8 = 0x40;
}

impl Element for CmduHeader {
    fn layout(cursor: &mut FieldCursor<'_>) -> Result<Self> {
        Ok(Self {
            element: cursor.element_ref(),
            message_version: cursor.field()?,
            reserved: cursor.field()?,
            message_type: cursor.field()?,
            message_id: cursor.field()?,
            fragment_id: cursor.field()?,
            flags: cursor.field()?,
            length: cursor.field()?,
        })
    }

    fn element(&self) -> ElementRef {
        self.element
    }
}

/// IEEE 1905.1 message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    TopologyDiscovery = 0x0000,
    TopologyNotification = 0x0001,
    TopologyQuery = 0x0002,
    TopologyResponse = 0x0003,
    VendorSpecific = 0x0004,
    LinkMetricQuery = 0x0005,
    LinkMetricResponse = 0x0006,
    ApAutoconfigurationSearch = 0x0007,
    ApAutoconfigurationResponse = 0x0008,
    ApAutoconfigurationWsc = 0x0009,
    ApAutoconfigurationRenew = 0x000A,
    PushButtonEventNotification = 0x000B,
    PushButtonJoinNotification = 0x000C,
    HigherLayerQuery = 0x000D,
    HigherLayerResponse = 0x000E,
    InterfacePowerChangeRequest = 0x000F,
    InterfacePowerChangeResponse = 0x0010,
    GenericPhyQuery = 0x0011,
    GenericPhyResponse = 0x0012,
}

impl MessageType {
    /// Every known message type, indexed by its value.
    pub const ALL: [MessageType; 19] = [
        Self::TopologyDiscovery,
        Self::TopologyNotification,
        Self::TopologyQuery,
        Self::TopologyResponse,
        Self::VendorSpecific,
        Self::LinkMetricQuery,
        Self::LinkMetricResponse,
        Self::ApAutoconfigurationSearch,
        Self::ApAutoconfigurationResponse,
        Self::ApAutoconfigurationWsc,
        Self::ApAutoconfigurationRenew,
        Self::PushButtonEventNotification,
        Self::PushButtonJoinNotification,
        Self::HigherLayerQuery,
        Self::HigherLayerResponse,
        Self::InterfacePowerChangeRequest,
        Self::InterfacePowerChangeResponse,
        Self::GenericPhyQuery,
        Self::GenericPhyResponse,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TopologyDiscovery => "topology_discovery",
            Self::TopologyNotification => "topology_notification",
            Self::TopologyQuery => "topology_query",
            Self::TopologyResponse => "topology_response",
            Self::VendorSpecific => "vendor_specific",
            Self::LinkMetricQuery => "link_metric_query",
            Self::LinkMetricResponse => "link_metric_response",
            Self::ApAutoconfigurationSearch => "ap_autoconfiguration_search",
            Self::ApAutoconfigurationResponse => "ap_autoconfiguration_response",
            Self::ApAutoconfigurationWsc => "ap_autoconfiguration_wsc",
            Self::ApAutoconfigurationRenew => "ap_autoconfiguration_renew",
            Self::PushButtonEventNotification => "push_button_event_notification",
            Self::PushButtonJoinNotification => "push_button_join_notification",
            Self::HigherLayerQuery => "higher_layer_query",
            Self::HigherLayerResponse => "higher_layer_response",
            Self::InterfacePowerChangeRequest => "interface_power_change_request",
            Self::InterfacePowerChangeResponse => "interface_power_change_response",
            Self::GenericPhyQuery => "generic_phy_query",
            Self::GenericPhyResponse => "generic_phy_response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A TLV skipped during parsing because its tag is not a known kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTlv {
    pub tag: u8,
    pub length: u16,
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finalized,
    Aborted,
}

/// A complete protocol message over one exclusively borrowed buffer.
///
/// In build mode elements are appended with [`Cmdu::add`] and the message
/// is made wire-ready with [`Cmdu::finalize`]. In parse mode elements are
/// reconstructed in wire order with [`Cmdu::next`] or [`Cmdu::next_tlv`].
pub struct Cmdu<'a> {
    buf: &'a mut [u8],
    mode: Mode,
    /// Build: end of the occupied region. Parse: declared total length.
    end: usize,
    /// Parse: next unread top-level byte.
    read_pos: usize,
    header: CmduHeader,
    elements: Vec<ElementState>,
    alloc_order: u64,
    state: State,
}

/// Walk `T`'s layout once. In build mode a measuring pass runs first so
/// nothing is written when the element does not fit.
fn declare<T: Element>(
    buf: &mut [u8],
    mode: Mode,
    index: usize,
    start: usize,
    limit: usize,
) -> Result<(T, ElementLayout)> {
    if mode == Mode::Build {
        let mut empty = [0u8; 0];
        let mut measure = FieldCursor::new(&mut empty, Mode::Measure, index, start, usize::MAX);
        T::layout(&mut measure)?;
        let needed = measure.position() - start;
        let remaining = limit.saturating_sub(start);
        if needed > remaining {
            return Err(TlvError::OutOfSpace {
                requested: needed,
                remaining,
            });
        }
    }
    let mut cursor = FieldCursor::new(buf, mode, index, start, limit);
    let element = T::layout(&mut cursor)?;
    let layout = cursor.finish()?;
    Ok((element, layout))
}

impl<'a> Cmdu<'a> {
    /// Start building a CMDU at the beginning of `buf`.
    pub fn create(buf: &'a mut [u8], message_type: u16, message_id: u16) -> Result<Self> {
        let limit = buf.len();
        let (header, layout) = declare::<CmduHeader>(buf, Mode::Build, 0, 0, limit)?;
        let end = layout.end;
        let mut cmdu = Self {
            buf,
            mode: Mode::Build,
            end,
            read_pos: end,
            header,
            elements: vec![ElementState::new(layout, None, 1, Phase::Constructing)],
            alloc_order: 1,
            state: State::Open,
        };
        cmdu.set(header.message_type, message_type)?;
        cmdu.set(header.message_id, message_id)?;
        cmdu.set(header.flags, CmduHeader::LAST_FRAGMENT)?;
        debug!(message_type, message_id, capacity = limit, "cmdu created");
        Ok(cmdu)
    }

    /// Parse the CMDU header of a received buffer.
    ///
    /// The header is converted to host order in place; TLVs are read with
    /// [`Cmdu::next`] or [`Cmdu::next_tlv`].
    pub fn parse(buf: &'a mut [u8]) -> Result<Self> {
        let limit = buf.len();
        let (header, layout) = declare::<CmduHeader>(buf, Mode::Parse, 0, 0, limit)?;
        let at = header.length.offset;
        let total = u16::from_be_bytes([buf[at], buf[at + 1]]) as usize;
        if total < layout.end {
            return Err(TlvError::Malformed("declared message length shorter than header"));
        }
        if total > limit {
            return Err(TlvError::Malformed("declared message length exceeds buffer"));
        }
        let read_pos = layout.end;
        let mut cmdu = Self {
            buf,
            mode: Mode::Parse,
            end: total,
            read_pos,
            header,
            elements: vec![ElementState::new(layout, None, 0, Phase::Parsed)],
            alloc_order: 0,
            state: State::Open,
        };
        cmdu.swap_element(0);
        debug!(
            message_type = cmdu.message_type(),
            message_id = cmdu.message_id(),
            length = total,
            "cmdu parsed"
        );
        Ok(cmdu)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn header(&self) -> CmduHeader {
        self.header
    }

    pub fn message_type(&self) -> u16 {
        self.get(self.header.message_type)
    }

    pub fn message_id(&self) -> u16 {
        self.get(self.header.message_id)
    }

    pub fn set_message_id(&mut self, message_id: u16) -> Result<()> {
        self.set(self.header.message_id, message_id)
    }

    pub fn relay_indicator(&self) -> bool {
        self.get(self.header.flags) & CmduHeader::RELAY_INDICATOR != 0
    }

    pub fn set_relay_indicator(&mut self, relay: bool) -> Result<()> {
        let mut flags = self.get(self.header.flags);
        if relay {
            flags |= CmduHeader::RELAY_INDICATOR;
        } else {
            flags &= !CmduHeader::RELAY_INDICATOR;
        }
        self.set(self.header.flags, flags)
    }

    pub fn is_last_fragment(&self) -> bool {
        self.get(self.header.flags) & CmduHeader::LAST_FRAGMENT != 0
    }

    /// Occupied length in bytes (build) or declared total length (parse).
    pub fn len(&self) -> usize {
        self.end
    }

    /// True when the message holds nothing but its header.
    pub fn is_empty(&self) -> bool {
        self.end <= CMDU_HEADER_LENGTH
    }

    /// Total size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The occupied prefix of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.end]
    }

    /// Number of elements, header included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    /// True when the header bytes are in wire order.
    pub fn is_swapped(&self) -> bool {
        self.elements[0].swapped
    }

    /// Read a field in host order, whatever the current buffer byte order.
    ///
    /// # Panics
    ///
    /// If `field` was declared by a different message and does not fall
    /// inside one of this message's elements. [`Cmdu::try_get`] returns
    /// `None` instead.
    pub fn get<T: WireType>(&self, field: Field<T>) -> T {
        match self.try_get(field) {
            Some(value) => value,
            None => panic!("field handle does not belong to this message"),
        }
    }

    /// Read a field, or `None` when the handle is not one of this message's.
    pub fn try_get<T: WireType>(&self, field: Field<T>) -> Option<T> {
        self.field_range::<T>(field.element, field.offset)?;
        Some(self.read_value(field.element, field.offset))
    }

    /// Write a field of an element that is still being built.
    pub fn set<T: WireType>(&mut self, field: Field<T>, value: T) -> Result<()> {
        self.ensure_building()?;
        let range = self
            .field_range::<T>(field.element, field.offset)
            .ok_or(TlvError::Malformed("unknown element"))?;
        let state = &mut self.elements[field.element];
        if state.phase == Phase::Finalized {
            return Err(TlvError::Finalized);
        }
        let bytes = &mut self.buf[range];
        value.write(bytes);
        if state.swapped {
            T::swap(bytes);
        }
        state.mark_written(field.offset);
        Ok(())
    }

    /// Current number of entries of a list.
    pub fn count<T: WireType>(&self, list: List<T>) -> usize {
        self.elements
            .get(list.element)
            .and_then(ElementState::list)
            .map_or(0, |l| l.count)
    }

    /// Entry at `index`, or `None` when `index` is not below the entry count.
    pub fn entry<T: WireType>(&self, list: List<T>, index: usize) -> Option<T> {
        let layout = self.elements.get(list.element)?.list()?;
        if index >= layout.count {
            return None;
        }
        let offset = layout.offset + index * layout.entry_size;
        Some(self.read_value(list.element, offset))
    }

    /// Iterate over every entry of a list.
    pub fn entries<'b, T: WireType + 'b>(&'b self, list: List<T>) -> impl Iterator<Item = T> + 'b {
        (0..self.count(list)).filter_map(move |i| self.entry(list, i))
    }

    /// Overwrite an allocated entry.
    pub fn set_entry<T: WireType>(&mut self, list: List<T>, index: usize, value: T) -> Result<()> {
        self.ensure_building()?;
        let state = self
            .elements
            .get(list.element)
            .ok_or(TlvError::Malformed("unknown element"))?;
        if state.phase == Phase::Finalized {
            return Err(TlvError::Finalized);
        }
        let layout = *state
            .list()
            .ok_or(TlvError::Malformed("element has no variable-length list"))?;
        if index >= layout.count {
            return Err(TlvError::EntryNotFound {
                index,
                count: layout.count,
            });
        }
        let swapped = state.swapped;
        let offset = layout.offset + index * layout.entry_size;
        let bytes = &mut self.buf[offset..offset + T::SIZE];
        value.write(bytes);
        if swapped {
            T::swap(bytes);
        }
        Ok(())
    }

    /// Grow a list by `count` zeroed entries.
    ///
    /// Only the most recently added element may grow its list: once a later
    /// element claimed buffer space the list is frozen and the attempt aborts
    /// the whole message with [`TlvError::OutOfOrder`]. Running out of buffer
    /// fails with [`TlvError::OutOfSpace`] and changes nothing.
    pub fn alloc<T: WireType>(&mut self, list: List<T>, count: usize) -> Result<()> {
        self.ensure_building()?;
        let index = list.element;
        let state = self
            .elements
            .get(index)
            .ok_or(TlvError::Malformed("unknown element"))?;
        if state.phase == Phase::Finalized {
            return Err(TlvError::Finalized);
        }
        let layout = *state
            .list()
            .ok_or(TlvError::Malformed("element has no variable-length list"))?;
        if state.order != self.alloc_order {
            warn!(element = index, "out of order list allocation, aborting message");
            return Err(self.abort(TlvError::OutOfOrder { element: index }));
        }

        let remaining = self.buf.len() - self.end;
        let span = count
            .checked_mul(layout.entry_size)
            .ok_or(TlvError::OutOfSpace {
                requested: usize::MAX,
                remaining,
            })?;
        if span > remaining {
            return Err(TlvError::OutOfSpace {
                requested: span,
                remaining,
            });
        }
        self.check_headroom(index, span)?;

        let at = layout.offset + layout.count * layout.entry_size;
        insert_span(&mut self.buf[..], at, span, self.end)?;
        self.end += span;
        if let Some(list) = self.elements[index].list_mut() {
            list.count += count;
        }
        self.grow(index, span);
        trace!(element = index, count, span, "list entries allocated");
        Ok(())
    }

    /// Append a top-level element.
    pub fn add<T: Element>(&mut self) -> Result<T> {
        self.push_element(None)
    }

    /// Append an element inside the nested region of `parent`.
    ///
    /// `parent` must still end where the message ends.
    pub fn add_child<T: Element>(&mut self, parent: ElementRef) -> Result<T> {
        self.ensure_building()?;
        let state = self
            .elements
            .get(parent.0)
            .ok_or(TlvError::Malformed("unknown parent element"))?;
        if state.nested_end().is_none() {
            return Err(TlvError::Malformed("parent element has no nested region"));
        }
        if state.phase == Phase::Finalized {
            return Err(TlvError::Finalized);
        }
        if state.layout.end != self.end {
            warn!(element = parent.0, "child added behind a later element, aborting message");
            return Err(self.abort(TlvError::OutOfOrder { element: parent.0 }));
        }
        self.push_element(Some(parent.0))
    }

    /// Finalize one element (and its nested children).
    ///
    /// Finalizing twice is a no-op. The header is finalized by
    /// [`Cmdu::finalize`] since it carries the total length.
    pub fn finalize_element(&mut self, element: ElementRef) -> Result<()> {
        if self.state == State::Aborted {
            return Err(TlvError::Aborted);
        }
        if self.mode == Mode::Parse {
            debug!(element = element.0, "finalize called on a parsed element");
            return Ok(());
        }
        if element.0 == 0 {
            return Err(TlvError::Malformed("the header is finalized with the message"));
        }
        if element.0 >= self.elements.len() {
            return Err(TlvError::Malformed("unknown element"));
        }
        self.finalize_index(element.0)
    }

    /// Write the total length into the header, then finalize every element
    /// in order and leave the buffer in wire order. Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            State::Finalized => {
                debug!("finalize called for an already finalized message");
                return Ok(());
            }
            State::Aborted => return Err(TlvError::Aborted),
            State::Open => {}
        }
        if self.mode == Mode::Parse {
            return Ok(());
        }

        let total =
            u16::try_from(self.end).map_err(|_| TlvError::LengthOverflow { length: self.end })?;
        let header = self.header;
        self.set(header.length, total)?;

        for index in 0..self.elements.len() {
            if let Err(err) = self.finalize_index(index) {
                warn!(element = index, error = %err, "finalize failed, aborting message");
                return Err(self.abort(err));
            }
        }
        self.state = State::Finalized;
        debug!(
            length = self.end,
            elements = self.elements.len(),
            "cmdu finalized"
        );
        Ok(())
    }

    /// Convert every element between host and wire order in place.
    ///
    /// Applying it twice restores the buffer.
    pub fn swap(&mut self) {
        for index in 0..self.elements.len() {
            self.swap_element(index);
        }
    }

    /// True while unread top-level bytes remain (parse mode).
    pub fn has_more(&self) -> bool {
        self.mode == Mode::Parse && self.state != State::Aborted && self.read_pos < self.end
    }

    /// Tag of the next unread top-level TLV.
    pub fn peek_tag(&self) -> Option<u8> {
        self.has_more().then(|| self.buf[self.read_pos])
    }

    /// True while unread bytes remain in `parent`'s nested region.
    pub fn has_more_children(&self, parent: ElementRef) -> bool {
        self.peek_child_tag(parent).is_some()
    }

    /// Tag of the next unread TLV nested in `parent`.
    pub fn peek_child_tag(&self, parent: ElementRef) -> Option<u8> {
        if self.mode != Mode::Parse || self.state == State::Aborted {
            return None;
        }
        let state = self.elements.get(parent.0)?;
        let end = state.nested_end()?;
        (state.child_pos < end).then(|| self.buf[state.child_pos])
    }

    /// Reconstruct the next top-level element as `T`.
    ///
    /// Any failure, a tag mismatch in particular, aborts the message: the
    /// remaining bytes cannot be trusted.
    pub fn next<T: Element>(&mut self) -> Result<T> {
        self.next_in(None)
    }

    /// Reconstruct the next element nested in `parent` as `T`.
    pub fn next_child<T: Element>(&mut self, parent: ElementRef) -> Result<T> {
        self.next_in(Some(parent))
    }

    /// Value bytes of a skipped TLV.
    pub fn raw_value(&self, tlv: &UnknownTlv) -> &[u8] {
        let start = tlv.offset + TLV_HEADER_LENGTH;
        &self.buf[start..start + tlv.length as usize]
    }

    pub(crate) fn next_in<T: Element>(&mut self, parent: Option<ElementRef>) -> Result<T> {
        self.ensure_parsing()?;
        let (start, limit) = self.read_window(parent)?;
        let index = self.elements.len();
        let (element, layout) =
            match declare::<T>(&mut self.buf[..], Mode::Parse, index, start, limit) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(offset = start, error = %err, "element parse failed, aborting message");
                    return Err(self.abort(err));
                }
            };
        let end = layout.end;
        let tag = layout.tag;
        self.elements.push(ElementState::new(
            layout,
            parent.map(|p| p.0),
            0,
            Phase::Parsed,
        ));
        self.swap_element(index);
        self.advance_window(parent, end);
        trace!(index, tag = ?tag, offset = start, "element parsed");
        Ok(element)
    }

    pub(crate) fn skip_unknown(&mut self, parent: Option<ElementRef>) -> Result<UnknownTlv> {
        self.ensure_parsing()?;
        let (start, limit) = self.read_window(parent)?;
        let available = limit.saturating_sub(start);
        if available < TLV_HEADER_LENGTH {
            return Err(self.abort(TlvError::OutOfSpace {
                requested: TLV_HEADER_LENGTH,
                remaining: available,
            }));
        }
        let tag = self.buf[start];
        let length = u16::from_be_bytes([self.buf[start + 1], self.buf[start + 2]]);
        if length as usize > available - TLV_HEADER_LENGTH {
            return Err(self.abort(TlvError::OutOfSpace {
                requested: length as usize,
                remaining: available - TLV_HEADER_LENGTH,
            }));
        }
        self.advance_window(parent, start + TLV_HEADER_LENGTH + length as usize);
        debug!(tag, length, "skipping unknown TLV");
        Ok(UnknownTlv {
            tag,
            length,
            offset: start,
        })
    }

    fn push_element<T: Element>(&mut self, parent: Option<usize>) -> Result<T> {
        self.ensure_building()?;
        let index = self.elements.len();
        let limit = self.buf.len();
        let (element, layout) =
            declare::<T>(&mut self.buf[..], Mode::Build, index, self.end, limit)?;
        let size = layout.end - layout.start;
        if let Some(parent) = parent {
            self.check_headroom(parent, size)?;
        }
        if let Some(length_offset) = layout.length_offset {
            let body = layout.end - layout.body_start;
            let body = u16::try_from(body).map_err(|_| TlvError::LengthOverflow { length: body })?;
            body.write(&mut self.buf[length_offset..length_offset + 2]);
        }

        self.end = layout.end;
        self.alloc_order += 1;
        let tag = layout.tag;
        self.elements.push(ElementState::new(
            layout,
            parent,
            self.alloc_order,
            Phase::Constructing,
        ));
        if let Some(parent) = parent {
            self.grow(parent, size);
        }
        debug!(index, tag = ?tag, size, parent = ?parent, "element added");
        Ok(element)
    }

    fn finalize_index(&mut self, index: usize) -> Result<()> {
        if self.elements[index].phase == Phase::Finalized {
            return Ok(());
        }
        let children: Vec<usize> = (index + 1..self.elements.len())
            .filter(|&i| self.elements[i].parent == Some(index))
            .collect();
        for child in children {
            self.finalize_index(child)?;
        }
        self.check_consistency(index)?;
        if !self.elements[index].swapped {
            self.swap_element(index);
        }
        self.elements[index].phase = Phase::Finalized;
        trace!(element = index, "element finalized");
        Ok(())
    }

    fn check_consistency(&self, index: usize) -> Result<()> {
        let state = &self.elements[index];
        if let Some(tag) = state.layout.tag {
            if self.buf[state.layout.start] != tag {
                return Err(TlvError::Malformed("type tag was overwritten"));
            }
        }
        if let Some(length_offset) = state.layout.length_offset {
            let length: u16 = self.read_value(index, length_offset);
            if length as usize != state.body_len() {
                return Err(TlvError::Malformed("length field does not match element size"));
            }
        }
        if !state.all_required_written() {
            return Err(TlvError::Malformed("required field was never set"));
        }
        Ok(())
    }

    fn swap_element(&mut self, index: usize) {
        let state = &mut self.elements[index];
        for span in &state.layout.spans {
            (span.swap)(&mut self.buf[span.offset..span.offset + span.size]);
        }
        if let Some(list) = state.list() {
            for i in 0..list.count {
                let at = list.offset + i * list.entry_size;
                (list.swap)(&mut self.buf[at..at + list.entry_size]);
            }
        }
        state.swapped = !state.swapped;
    }

    /// Fail with `LengthOverflow` if growing `index` and its ancestors by
    /// `extra` bytes would overflow any length field.
    fn check_headroom(&self, index: usize, extra: usize) -> Result<()> {
        let mut next = Some(index);
        while let Some(i) = next {
            let state = &self.elements[i];
            if state.layout.length_offset.is_some() {
                let length = state.body_len() + extra;
                if length > u16::MAX as usize {
                    return Err(TlvError::LengthOverflow { length });
                }
            }
            next = state.parent;
        }
        Ok(())
    }

    /// Extend `index` and every ancestor by `extra` bytes.
    fn grow(&mut self, index: usize, extra: usize) {
        let mut next = Some(index);
        while let Some(i) = next {
            let state = &mut self.elements[i];
            state.layout.end += extra;
            if let Some(length_offset) = state.layout.length_offset {
                let body = state.body_len() as u16;
                let bytes = &mut self.buf[length_offset..length_offset + 2];
                body.write(bytes);
                if state.swapped {
                    <u16 as WireType>::swap(bytes);
                }
            }
            next = state.parent;
        }
    }

    /// Byte range of a `T` at `offset`, if it lies inside element `element`.
    fn field_range<T: WireType>(&self, element: usize, offset: usize) -> Option<Range<usize>> {
        let layout = &self.elements.get(element)?.layout;
        let end = offset.checked_add(T::SIZE)?;
        (offset >= layout.start && end <= layout.end).then_some(offset..end)
    }

    fn read_value<T: WireType>(&self, element: usize, offset: usize) -> T {
        let bytes = &self.buf[offset..offset + T::SIZE];
        if !self.elements[element].swapped {
            return T::read(bytes);
        }
        if T::SIZE <= READ_SCRATCH_SIZE {
            let mut scratch = [0u8; READ_SCRATCH_SIZE];
            let host = &mut scratch[..T::SIZE];
            host.copy_from_slice(bytes);
            T::swap(host);
            T::read(host)
        } else {
            let mut host = bytes.to_vec();
            T::swap(&mut host);
            T::read(&host)
        }
    }

    fn read_window(&self, parent: Option<ElementRef>) -> Result<(usize, usize)> {
        match parent {
            None => Ok((self.read_pos, self.end)),
            Some(parent) => {
                let state = self
                    .elements
                    .get(parent.0)
                    .ok_or(TlvError::Malformed("unknown parent element"))?;
                let end = state
                    .nested_end()
                    .ok_or(TlvError::Malformed("parent element has no nested region"))?;
                Ok((state.child_pos, end))
            }
        }
    }

    fn advance_window(&mut self, parent: Option<ElementRef>, end: usize) {
        match parent {
            None => self.read_pos = end,
            Some(parent) => self.elements[parent.0].child_pos = end,
        }
    }

    fn ensure_building(&self) -> Result<()> {
        match (self.state, self.mode) {
            (State::Aborted, _) => Err(TlvError::Aborted),
            (_, Mode::Parse) => Err(TlvError::ReadOnly),
            (State::Finalized, _) => Err(TlvError::Finalized),
            _ => Ok(()),
        }
    }

    fn ensure_parsing(&self) -> Result<()> {
        match (self.state, self.mode) {
            (State::Aborted, _) => Err(TlvError::Aborted),
            (_, Mode::Parse) => Ok(()),
            _ => Err(TlvError::Malformed("message is being built, not parsed")),
        }
    }

    fn abort(&mut self, err: TlvError) -> TlvError {
        self.state = State::Aborted;
        err
    }
}

impl fmt::Debug for Cmdu<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmdu")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("len", &self.end)
            .field("capacity", &self.buf.len())
            .field("elements", &self.elements.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{TlvElement, TlvHeader};
    use crate::mac::MacAddr;
    use crate::tlvs::{
        InterfacePairInfo, LinkMetricInfo, TlvAlMacAddress, TlvMacAddress,
        TlvNon1905NeighborDeviceList, TlvTransmitterLinkMetric, TlvVendorSpecific,
    };

    const REPORTER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const NEIGHBOR: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

    /// Test element with 8-byte entries and no fixed fields.
    #[derive(Debug, Clone, Copy)]
    struct TlvCounters {
        header: TlvHeader,
        counters: List<u64>,
    }

    impl Element for TlvCounters {
        fn layout(cursor: &mut FieldCursor<'_>) -> Result<Self> {
            Ok(Self {
                header: cursor.tlv_header(0xF0)?,
                counters: cursor.list()?,
            })
        }

        fn element(&self) -> ElementRef {
            self.header.element
        }
    }

    #[test]
    fn message_type_registry_matches_opcodes() {
        for opcode in 0..=0x0012u16 {
            let kind = MessageType::from_u16(opcode).unwrap();
            assert_eq!(kind.as_u16(), opcode);
        }
        assert_eq!(MessageType::from_u16(0x0013), None);
        assert_eq!(MessageType::LinkMetricResponse.to_string(), "link_metric_response");
    }

    #[test]
    fn link_metric_with_two_addresses_round_trips() {
        let mut buf = [0u8; 64];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0006, 0x1234).unwrap();
            let tlv = cmdu.add::<TlvTransmitterLinkMetric>().unwrap();
            cmdu.set(tlv.reporter_al_mac, REPORTER).unwrap();
            cmdu.set(tlv.neighbor_al_mac, NEIGHBOR).unwrap();
            cmdu.finalize().unwrap();
            assert_eq!(cmdu.len(), CMDU_HEADER_LENGTH + 1 + 2 + 12);
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        assert_eq!(cmdu.message_type(), 0x0006);
        assert_eq!(cmdu.message_id(), 0x1234);
        let tlv = cmdu.next::<TlvTransmitterLinkMetric>().unwrap();
        assert_eq!(cmdu.get(tlv.header().tag), 0x09);
        assert_eq!(cmdu.get(tlv.reporter_al_mac), REPORTER);
        assert_eq!(cmdu.get(tlv.neighbor_al_mac), NEIGHBOR);
        assert_eq!(cmdu.count(tlv.interface_pair_info), 0);
        assert!(!cmdu.has_more());
    }

    #[test]
    fn list_entries_round_trip_with_count_from_length() {
        let mut buf = [0u8; 256];
        let first = InterfacePairInfo {
            rc_interface_mac: REPORTER,
            neighbor_interface_mac: NEIGHBOR,
            link_metric_info: LinkMetricInfo {
                intf_type: 0x0105,
                ieee802_1_bridge_flag: 1,
                packet_errors: 3,
                transmitted_packets: 0x0102_0304,
                mac_throughput_capacity: 866,
                link_availability: 100,
                phy_rate: 1200,
            },
        };
        let second = InterfacePairInfo {
            link_metric_info: LinkMetricInfo {
                phy_rate: 300,
                ..first.link_metric_info
            },
            ..first
        };

        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0006, 7).unwrap();
            let tlv = cmdu.add::<TlvTransmitterLinkMetric>().unwrap();
            cmdu.set(tlv.reporter_al_mac, REPORTER).unwrap();
            cmdu.set(tlv.neighbor_al_mac, NEIGHBOR).unwrap();
            cmdu.alloc(tlv.interface_pair_info, 2).unwrap();
            cmdu.set_entry(tlv.interface_pair_info, 0, first).unwrap();
            cmdu.set_entry(tlv.interface_pair_info, 1, second).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let tlv = cmdu.next::<TlvTransmitterLinkMetric>().unwrap();
        assert_eq!(cmdu.count(tlv.interface_pair_info), 2);
        assert_eq!(cmdu.entry(tlv.interface_pair_info, 0), Some(first));
        assert_eq!(cmdu.entry(tlv.interface_pair_info, 1), Some(second));
        assert_eq!(cmdu.entry(tlv.interface_pair_info, 2), None);
        assert_eq!(cmdu.entries(tlv.interface_pair_info).count(), 2);
    }

    #[test]
    fn wire_bytes_are_big_endian() {
        let mut buf = [0u8; 32];
        let mut cmdu = Cmdu::create(&mut buf, 0x0102, 0x0304).unwrap();
        let tlv = cmdu.add::<TlvAlMacAddress>().unwrap();
        cmdu.set(tlv.mac, REPORTER).unwrap();
        cmdu.finalize().unwrap();
        assert_eq!(
            cmdu.as_bytes(),
            &[
                0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x00, 0x80, 0x00, 19, // header
                0x01, 0x00, 0x06, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // TLV
            ]
        );
    }

    #[test]
    fn three_entries_fill_exact_capacity_then_out_of_space() {
        let mut buf = [0u8; CMDU_HEADER_LENGTH + TLV_HEADER_LENGTH + 24];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let tlv = cmdu.add::<TlvCounters>().unwrap();
        assert_eq!(cmdu.capacity() - cmdu.len(), 24);

        cmdu.alloc(tlv.counters, 3).unwrap();
        assert_eq!(cmdu.count(tlv.counters), 3);

        let err = cmdu.alloc(tlv.counters, 1).unwrap_err();
        assert_eq!(
            err,
            TlvError::OutOfSpace {
                requested: 8,
                remaining: 0
            }
        );
        assert_eq!(cmdu.count(tlv.counters), 3);
        assert!(!cmdu.is_aborted());
    }

    #[test]
    fn out_of_space_leaves_buffer_unchanged() {
        let mut buf = [0xA5u8; CMDU_HEADER_LENGTH + 5];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let before = cmdu.as_bytes().to_vec();
        let len = cmdu.len();

        let err = cmdu.add::<TlvAlMacAddress>().unwrap_err();
        assert_eq!(
            err,
            TlvError::OutOfSpace {
                requested: 9,
                remaining: 5
            }
        );
        assert_eq!(cmdu.len(), len);
        assert_eq!(cmdu.as_bytes(), before.as_slice());
        drop(cmdu);
        assert_eq!(&buf[CMDU_HEADER_LENGTH..], &[0xA5; 5]);
    }

    #[test]
    fn list_allocation_follows_element_order() {
        let mut buf = [0u8; 128];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let a = cmdu.add::<TlvNon1905NeighborDeviceList>().unwrap();
        cmdu.alloc(a.non_1905_macs, 1).unwrap();
        let b = cmdu.add::<TlvNon1905NeighborDeviceList>().unwrap();
        cmdu.alloc(b.non_1905_macs, 2).unwrap();
        assert_eq!(cmdu.count(a.non_1905_macs), 1);
        assert_eq!(cmdu.count(b.non_1905_macs), 2);

        let err = cmdu.alloc(a.non_1905_macs, 1).unwrap_err();
        assert_eq!(err, TlvError::OutOfOrder { element: 1 });
        assert!(cmdu.is_aborted());
        assert_eq!(cmdu.finalize(), Err(TlvError::Aborted));
        assert!(matches!(
            cmdu.add::<TlvAlMacAddress>(),
            Err(TlvError::Aborted)
        ));
    }

    #[test]
    fn swap_twice_restores_finalized_bytes() {
        let mut buf = [0u8; 64];
        let mut cmdu = Cmdu::create(&mut buf, 0x0002, 0xBEEF).unwrap();
        let tlv = cmdu.add::<TlvCounters>().unwrap();
        cmdu.alloc(tlv.counters, 2).unwrap();
        cmdu.set_entry(tlv.counters, 1, 0x0102_0304_0506_0708).unwrap();
        cmdu.finalize().unwrap();
        let wire = cmdu.as_bytes().to_vec();

        cmdu.swap();
        assert!(!cmdu.is_swapped());
        assert_eq!(cmdu.entry(tlv.counters, 1), Some(0x0102_0304_0506_0708));
        assert_eq!(cmdu.message_id(), 0xBEEF);
        cmdu.swap();
        assert_eq!(cmdu.as_bytes(), wire.as_slice());
    }

    #[test]
    fn swap_while_building_keeps_lengths_consistent() {
        let mut buf = [0u8; 128];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0003, 1).unwrap();
            let list = cmdu.add::<TlvNon1905NeighborDeviceList>().unwrap();
            cmdu.set(list.local_mac, REPORTER).unwrap();
            cmdu.swap();
            cmdu.alloc(list.non_1905_macs, 1).unwrap();
            cmdu.set_entry(list.non_1905_macs, 0, NEIGHBOR).unwrap();

            let vendor = cmdu.add::<TlvVendorSpecific>().unwrap();
            cmdu.set(vendor.oui, [0x00, 0x50, 0xF2]).unwrap();
            cmdu.swap();
            let child = cmdu.add_child::<TlvAlMacAddress>(vendor.element()).unwrap();
            cmdu.set(child.mac, NEIGHBOR).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let list = cmdu.next::<TlvNon1905NeighborDeviceList>().unwrap();
        assert_eq!(cmdu.get(list.local_mac), REPORTER);
        assert_eq!(cmdu.entries(list.non_1905_macs).collect::<Vec<_>>(), vec![NEIGHBOR]);
        let vendor = cmdu.next::<TlvVendorSpecific>().unwrap();
        let child = cmdu
            .next_child::<TlvAlMacAddress>(vendor.element())
            .unwrap();
        assert_eq!(cmdu.get(child.mac), NEIGHBOR);
        assert!(!cmdu.has_more());
    }

    #[test]
    fn handles_from_another_message_are_rejected() {
        let mut buf = [0u8; 64];
        let mut source = Cmdu::create(&mut buf, 0, 0).unwrap();
        let foreign = source.add::<TlvNon1905NeighborDeviceList>().unwrap();

        let mut other_buf = [0u8; 64];
        let mut other = Cmdu::create(&mut other_buf, 0, 0).unwrap();
        assert_eq!(other.try_get(foreign.local_mac), None);
        assert_eq!(other.count(foreign.non_1905_macs), 0);
        assert_eq!(other.entry(foreign.non_1905_macs, 0), None);
        assert!(matches!(
            other.set(foreign.local_mac, REPORTER),
            Err(TlvError::Malformed(_))
        ));
        assert!(matches!(
            other.alloc(foreign.non_1905_macs, 1),
            Err(TlvError::Malformed(_))
        ));
        assert!(!other.is_aborted());
        assert_eq!(source.try_get(foreign.local_mac), Some(MacAddr::ZERO));
    }

    #[test]
    fn parse_rejects_unexpected_tag_and_aborts() {
        let mut buf = [0u8; 64];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
            let tlv = cmdu.add::<TlvMacAddress>().unwrap();
            cmdu.set(tlv.mac, REPORTER).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let elements = cmdu.element_count();
        let err = cmdu.next::<TlvAlMacAddress>().unwrap_err();
        assert_eq!(
            err,
            TlvError::TypeMismatch {
                expected: 0x01,
                found: 0x02
            }
        );
        assert_eq!(cmdu.element_count(), elements);
        assert!(!cmdu.has_more());
        assert_eq!(
            cmdu.next::<TlvMacAddress>().unwrap_err(),
            TlvError::Aborted
        );
    }

    #[test]
    fn finalize_is_idempotent_and_freezes_fields() {
        let mut buf = [0u8; 64];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let tlv = cmdu.add::<TlvAlMacAddress>().unwrap();
        cmdu.set(tlv.mac, REPORTER).unwrap();
        cmdu.finalize().unwrap();
        let wire = cmdu.as_bytes().to_vec();
        cmdu.finalize().unwrap();
        assert_eq!(cmdu.as_bytes(), wire.as_slice());
        assert_eq!(cmdu.set(tlv.mac, NEIGHBOR), Err(TlvError::Finalized));
        assert_eq!(cmdu.get(tlv.mac), REPORTER);
    }

    #[test]
    fn finalize_requires_required_fields() {
        let mut buf = [0u8; 64];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let tlv = cmdu.add::<TlvAlMacAddress>().unwrap();
        assert!(matches!(
            cmdu.finalize_element(tlv.element()),
            Err(TlvError::Malformed(_))
        ));
        cmdu.set(tlv.mac, REPORTER).unwrap();
        cmdu.finalize_element(tlv.element()).unwrap();
        cmdu.finalize_element(tlv.element()).unwrap();
        assert_eq!(cmdu.set(tlv.mac, REPORTER), Err(TlvError::Finalized));
    }

    #[test]
    fn finalize_detects_overwritten_tag() {
        let mut buf = [0u8; 64];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let tlv = cmdu.add::<TlvAlMacAddress>().unwrap();
        cmdu.set(tlv.mac, REPORTER).unwrap();
        cmdu.set(tlv.header().tag, 0x7F).unwrap();
        assert!(matches!(cmdu.finalize(), Err(TlvError::Malformed(_))));
        assert!(cmdu.is_aborted());
    }

    #[test]
    fn nested_children_grow_parent_length() {
        let mut buf = [0u8; 128];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0004, 1).unwrap();
            let vendor = cmdu.add::<TlvVendorSpecific>().unwrap();
            cmdu.set(vendor.oui, [0x00, 0x50, 0xF2]).unwrap();
            let inner = cmdu
                .add_child::<TlvNon1905NeighborDeviceList>(vendor.element())
                .unwrap();
            cmdu.set(inner.local_mac, REPORTER).unwrap();
            cmdu.alloc(inner.non_1905_macs, 2).unwrap();
            cmdu.set_entry(inner.non_1905_macs, 1, NEIGHBOR).unwrap();

            let vendor_body = 3 + TLV_HEADER_LENGTH + 6 + 12;
            assert_eq!(cmdu.get(vendor.header().length) as usize, vendor_body);
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let vendor = cmdu.next::<TlvVendorSpecific>().unwrap();
        assert_eq!(cmdu.get(vendor.oui), [0x00, 0x50, 0xF2]);
        assert!(!cmdu.has_more());
        assert!(cmdu.has_more_children(vendor.element()));
        let inner = cmdu
            .next_child::<TlvNon1905NeighborDeviceList>(vendor.element())
            .unwrap();
        assert_eq!(cmdu.get(inner.local_mac), REPORTER);
        assert_eq!(cmdu.entry(inner.non_1905_macs, 1), Some(NEIGHBOR));
        assert!(!cmdu.has_more_children(vendor.element()));
    }

    #[test]
    fn child_behind_later_sibling_is_out_of_order() {
        let mut buf = [0u8; 128];
        let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
        let vendor = cmdu.add::<TlvVendorSpecific>().unwrap();
        cmdu.add::<TlvAlMacAddress>().unwrap();
        let err = cmdu
            .add_child::<TlvAlMacAddress>(vendor.element())
            .unwrap_err();
        assert_eq!(err, TlvError::OutOfOrder { element: 1 });
    }

    #[test]
    fn parse_rejects_declared_length_beyond_buffer() {
        let mut wire = [0u8; CMDU_HEADER_LENGTH];
        wire[9] = 40;
        assert!(matches!(
            Cmdu::parse(&mut wire),
            Err(TlvError::Malformed(_))
        ));
    }

    #[test]
    fn parsed_message_is_read_only() {
        let mut buf = [0u8; 32];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };
        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        assert_eq!(cmdu.set_message_id(9), Err(TlvError::ReadOnly));
        assert!(cmdu.finalize().is_ok());
        assert!(cmdu.is_empty());
    }

    #[test]
    fn truncated_tlv_is_rejected() {
        let mut buf = [0u8; 64];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0, 0).unwrap();
            let tlv = cmdu.add::<TlvCounters>().unwrap();
            cmdu.alloc(tlv.counters, 2).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };
        // Shrink the declared total length so the TLV runs past it.
        let mut wire = buf[..len].to_vec();
        let short = (len - 4) as u16;
        wire[8..10].copy_from_slice(&short.to_be_bytes());
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        assert!(matches!(
            cmdu.next::<TlvCounters>(),
            Err(TlvError::OutOfSpace { .. })
        ));
        assert!(cmdu.is_aborted());
    }
}
