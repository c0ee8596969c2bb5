//! Per-packet processing state.
//!
//! A [`Context`] travels with a packet through the pipeline: it owns the raw
//! bytes, the header and field bindings installed by the application, the
//! accumulated action list, and the egress decision. One context lives inside
//! each pool buffer and is recycled with it.

use crate::action::Action;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::port::PortId;
use std::collections::HashMap;

/// Identifies a previously bound field on a context.
pub type FieldId = u32;

/// Identifies a previously bound header base on a context.
pub type HeaderId = u32;

/// The two memories a field can refer to. Packet offsets are relative to the
/// current header base; metadata offsets are absolute within the per-context
/// scratch area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Packet,
    Metadata,
}

impl AddressSpace {
    fn name(self) -> &'static str {
        match self {
            AddressSpace::Packet => "packet",
            AddressSpace::Metadata => "metadata",
        }
    }
}

/// The offset and length of a value within one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub space: AddressSpace,
    pub offset: u16,
    pub length: u16,
}

/// A recorded field binding. The header base active at bind time is kept
/// alongside the relative offset so the absolute position stays recoverable
/// after the cursor advances past the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub base: u16,
    pub offset: u16,
    pub length: u16,
}

impl Binding {
    /// Absolute byte position within the packet.
    pub fn absolute(&self) -> usize {
        self.base as usize + self.offset as usize
    }
}

/// Where a packet goes when processing finishes. Later writers override
/// earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    None,
    Port(PortId),
    Drop,
    Flood,
}

/// Per-packet mutable state threaded through the pipeline.
pub struct Context {
    data: Box<[u8]>,
    len: usize,
    metadata: Box<[u8]>,
    offset: u16,
    headers: HashMap<HeaderId, u16>,
    fields: HashMap<FieldId, Binding>,
    actions: Vec<Action>,
    ingress: PortId,
    decision: Decision,
    queue: Option<u32>,
    group: Option<u32>,
    depth: u8,
}

impl Context {
    pub fn new(buffer_size: usize, metadata_size: usize) -> Self {
        Self {
            data: vec![0; buffer_size].into_boxed_slice(),
            len: 0,
            metadata: vec![0; metadata_size].into_boxed_slice(),
            offset: 0,
            headers: HashMap::new(),
            fields: HashMap::new(),
            actions: Vec::new(),
            ingress: 0,
            decision: Decision::None,
            queue: None,
            group: None,
            depth: 0,
        }
    }

    /// Clears all per-packet state while keeping allocated capacity, so a
    /// recycled buffer does not allocate on the data path.
    pub fn reset(&mut self) {
        self.len = 0;
        self.offset = 0;
        self.headers.clear();
        self.fields.clear();
        self.actions.clear();
        self.ingress = 0;
        self.decision = Decision::None;
        self.queue = None;
        self.group = None;
        self.depth = 0;
    }

    // ========================================
    // Raw bytes
    // ========================================

    /// Full backing storage, for the receive path to fill.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Marks `len` bytes of the storage as the current packet.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(Error::OutOfBounds {
                space: "packet",
                offset: 0,
                length: len,
                bound: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    // ========================================
    // Header and field bindings
    // ========================================

    /// Current header base offset.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Moves the header base forward by `n` bytes. The base only ever
    /// advances; it fails rather than run past the packet.
    pub fn advance(&mut self, n: u16) -> Result<()> {
        let next = self.offset as usize + n as usize;
        if next > self.len {
            return Err(Error::OutOfBounds {
                space: "packet",
                offset: self.offset as usize,
                length: n as usize,
                bound: self.len,
            });
        }
        self.offset = next as u16;
        Ok(())
    }

    /// Records the current header base under `id`. Rebinding overwrites.
    pub fn bind_header(&mut self, id: HeaderId) {
        self.headers.insert(id, self.offset);
    }

    pub fn header_base(&self, id: HeaderId) -> Option<u16> {
        self.headers.get(&id).copied()
    }

    /// Binds `id` to `length` bytes at `offset` relative to the current
    /// header base. Rebinding overwrites.
    pub fn bind_field(&mut self, id: FieldId, offset: u16, length: u16) -> Result<Binding> {
        let binding = Binding {
            base: self.offset,
            offset,
            length,
        };
        if binding.absolute() + length as usize > self.len {
            return Err(Error::OutOfBounds {
                space: "packet",
                offset: binding.absolute(),
                length: length as usize,
                bound: self.len,
            });
        }
        self.fields.insert(id, binding);
        Ok(binding)
    }

    pub fn field_binding(&self, id: FieldId) -> Result<Binding> {
        self.fields.get(&id).copied().ok_or(Error::Unbound(id))
    }

    /// The current bytes of a bound field.
    pub fn field_bytes(&self, binding: Binding) -> Result<&[u8]> {
        let start = binding.absolute();
        let end = start + binding.length as usize;
        if end > self.len {
            return Err(Error::OutOfBounds {
                space: "packet",
                offset: start,
                length: binding.length as usize,
                bound: self.len,
            });
        }
        Ok(&self.data[start..end])
    }

    // ========================================
    // Field address resolution
    // ========================================

    /// Resolves a field descriptor to a range in its address space. Packet
    /// fields are relative to the current header base.
    fn resolve(&self, field: Field) -> Result<(AddressSpace, usize, usize)> {
        let (start, bound) = match field.space {
            AddressSpace::Packet => (self.offset as usize + field.offset as usize, self.len),
            AddressSpace::Metadata => (field.offset as usize, self.metadata.len()),
        };
        let end = start + field.length as usize;
        if end > bound {
            return Err(Error::OutOfBounds {
                space: field.space.name(),
                offset: start,
                length: field.length as usize,
                bound,
            });
        }
        Ok((field.space, start, end))
    }

    /// Reads the bytes a field refers to.
    pub fn read_field(&self, field: Field) -> Result<&[u8]> {
        let (space, start, end) = self.resolve(field)?;
        Ok(match space {
            AddressSpace::Packet => &self.data[start..end],
            AddressSpace::Metadata => &self.metadata[start..end],
        })
    }

    /// Overwrites the bytes a field refers to. `value` must match the field
    /// length exactly.
    pub fn write_field(&mut self, field: Field, value: &[u8]) -> Result<()> {
        if value.len() != field.length as usize {
            return Err(Error::OutOfBounds {
                space: field.space.name(),
                offset: field.offset as usize,
                length: value.len(),
                bound: field.length as usize,
            });
        }
        let (space, start, end) = self.resolve(field)?;
        match space {
            AddressSpace::Packet => self.data[start..end].copy_from_slice(value),
            AddressSpace::Metadata => self.metadata[start..end].copy_from_slice(value),
        }
        Ok(())
    }

    /// Copies a field's bytes to `offset` in the opposite address space.
    pub fn copy_field(&mut self, field: Field, offset: u16) -> Result<()> {
        let src = self.read_field(field)?.to_vec();
        let dst = Field {
            space: match field.space {
                AddressSpace::Packet => AddressSpace::Metadata,
                AddressSpace::Metadata => AddressSpace::Packet,
            },
            offset,
            length: field.length,
        };
        self.write_field(dst, &src)
    }

    // ========================================
    // Action list and egress decision
    // ========================================

    /// Appends an action to the list executed at commit.
    pub fn write_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Empties the action list.
    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn set_output(&mut self, port: PortId) {
        self.decision = Decision::Port(port);
    }

    pub fn set_drop(&mut self) {
        self.decision = Decision::Drop;
    }

    pub fn set_flood(&mut self) {
        self.decision = Decision::Flood;
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn set_queue(&mut self, queue: u32) {
        self.queue = Some(queue);
    }

    pub fn queue(&self) -> Option<u32> {
        self.queue
    }

    pub fn set_group(&mut self, group: u32) {
        self.group = Some(group);
    }

    pub fn group(&self) -> Option<u32> {
        self.group
    }

    pub fn set_ingress(&mut self, port: PortId) {
        self.ingress = port;
    }

    pub fn ingress(&self) -> PortId {
        self.ingress
    }

    // ========================================
    // Dispatch depth
    // ========================================

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn incr_depth(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    /// Executes the accumulated action list once, in insertion order, then
    /// returns the resolved egress decision. Terminal actions inside the list
    /// override any earlier decision.
    pub fn commit(&mut self, dp: &Dataplane) -> Result<Decision> {
        let actions = std::mem::take(&mut self.actions);
        for action in &actions {
            action.execute(dp, self)?;
        }
        Ok(self.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(bytes: &[u8]) -> Context {
        let mut ctx = Context::new(64, 32);
        ctx.storage_mut()[..bytes.len()].copy_from_slice(bytes);
        ctx.set_len(bytes.len()).unwrap();
        ctx
    }

    #[test]
    fn test_advance_within_bounds() {
        let mut ctx = ctx_with(&[0u8; 10]);
        ctx.advance(4).unwrap();
        assert_eq!(ctx.offset(), 4);
        ctx.advance(6).unwrap();
        assert_eq!(ctx.offset(), 10);
        assert!(ctx.advance(1).is_err());
    }

    #[test]
    fn test_bind_header_records_current_offset() {
        let mut ctx = ctx_with(&[0u8; 20]);
        ctx.bind_header(1);
        ctx.advance(14).unwrap();
        ctx.bind_header(2);
        assert_eq!(ctx.header_base(1), Some(0));
        assert_eq!(ctx.header_base(2), Some(14));
    }

    #[test]
    fn test_bind_field_absolute_after_advance() {
        let mut ctx = ctx_with(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
        ctx.advance(2).unwrap();
        let b = ctx.bind_field(7, 1, 2).unwrap();
        assert_eq!(b.absolute(), 3);
        // Binding survives a later advance.
        ctx.advance(2).unwrap();
        let b = ctx.field_binding(7).unwrap();
        assert_eq!(ctx.field_bytes(b).unwrap(), &[0xdd, 0xee]);
    }

    #[test]
    fn test_bind_field_out_of_bounds() {
        let mut ctx = ctx_with(&[0u8; 4]);
        assert!(matches!(
            ctx.bind_field(1, 2, 4),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_unbound_field_lookup_fails() {
        let ctx = ctx_with(&[0u8; 4]);
        assert!(matches!(ctx.field_binding(9), Err(Error::Unbound(9))));
    }

    #[test]
    fn test_rebinding_overwrites() {
        let mut ctx = ctx_with(&[1, 2, 3, 4]);
        ctx.bind_field(1, 0, 1).unwrap();
        ctx.bind_field(1, 2, 2).unwrap();
        let b = ctx.field_binding(1).unwrap();
        assert_eq!(ctx.field_bytes(b).unwrap(), &[3, 4]);
    }

    #[test]
    fn test_write_field_length_must_match() {
        let mut ctx = ctx_with(&[0u8; 8]);
        let f = Field {
            space: AddressSpace::Packet,
            offset: 0,
            length: 2,
        };
        assert!(ctx.write_field(f, &[1, 2, 3]).is_err());
        ctx.write_field(f, &[1, 2]).unwrap();
        assert_eq!(&ctx.bytes()[..2], &[1, 2]);
    }

    #[test]
    fn test_metadata_space_is_absolute() {
        let mut ctx = ctx_with(&[0u8; 8]);
        ctx.advance(4).unwrap();
        let f = Field {
            space: AddressSpace::Metadata,
            offset: 0,
            length: 2,
        };
        ctx.write_field(f, &[9, 9]).unwrap();
        // Advancing the packet cursor must not shift metadata reads.
        assert_eq!(ctx.read_field(f).unwrap(), &[9, 9]);
    }

    #[test]
    fn test_copy_field_between_spaces() {
        let mut ctx = ctx_with(&[0x11, 0x22, 0x33, 0x44]);
        let f = Field {
            space: AddressSpace::Packet,
            offset: 1,
            length: 2,
        };
        ctx.copy_field(f, 0).unwrap();
        let m = Field {
            space: AddressSpace::Metadata,
            offset: 0,
            length: 2,
        };
        assert_eq!(ctx.read_field(m).unwrap(), &[0x22, 0x33]);
    }

    #[test]
    fn test_decision_last_writer_wins() {
        let mut ctx = ctx_with(&[0u8; 4]);
        ctx.set_output(3);
        ctx.set_drop();
        ctx.set_flood();
        assert_eq!(ctx.decision(), Decision::Flood);
        ctx.set_output(5);
        assert_eq!(ctx.decision(), Decision::Port(5));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut ctx = ctx_with(&[1, 2, 3, 4]);
        ctx.advance(2).unwrap();
        ctx.bind_header(1);
        ctx.bind_field(1, 0, 1).unwrap();
        ctx.set_drop();
        ctx.incr_depth();
        ctx.reset();
        assert_eq!(ctx.len(), 0);
        assert_eq!(ctx.offset(), 0);
        assert_eq!(ctx.decision(), Decision::None);
        assert_eq!(ctx.depth(), 0);
        assert!(ctx.field_binding(1).is_err());
        assert_eq!(ctx.header_base(1), None);
    }
}
