//! Value marshaller: encodes templates and materializes them in target memory,
//! tracking every allocation it makes until `free_all`.

use crate::config::types::{ProbeError, Result};
use crate::safety::cleanup::{AllocationLedger, ReleaseReport};
use crate::target::control::RemoteHeap;
use crate::target::types::TargetType;
use crate::values::encoded::{encode_uint, EncodedValue};
use crate::values::encoder::{overlay, Encoder, EncodingPlan, PlanNode};
use crate::values::template::ValueTemplate;
use log::debug;

/// Template compiler plus owner of the session's target allocations
#[derive(Debug, Default)]
pub struct ValueMarshaller {
    ledger: AllocationLedger,
}

impl ValueMarshaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `template` as a value of `ty`. Pointer members with non-address
    /// templates are allocated in the target; their addresses are encoded.
    pub fn encode(
        &mut self,
        heap: &mut dyn RemoteHeap,
        ty: &TargetType,
        template: &ValueTemplate,
    ) -> Result<EncodedValue> {
        let plan = Encoder::new(&*heap).plan(ty, template)?;
        self.emit(heap, &plan)
    }

    pub fn encode_named(
        &mut self,
        heap: &mut dyn RemoteHeap,
        type_name: &str,
        template: &ValueTemplate,
    ) -> Result<EncodedValue> {
        let ty = heap.resolve_type(type_name)?;
        self.encode(heap, &ty, template)
    }

    /// Encode and place the value in fresh target memory. Returns a pointer to
    /// it; an array value decays to a pointer to its first element.
    pub fn allocate(
        &mut self,
        heap: &mut dyn RemoteHeap,
        ty: &TargetType,
        template: &ValueTemplate,
    ) -> Result<EncodedValue> {
        let value = self.encode(heap, ty, template)?;
        self.pointer_to(heap, &value)
    }

    /// Copy an encoded value into fresh target memory and return a pointer to it
    pub fn pointer_to(
        &mut self,
        heap: &mut dyn RemoteHeap,
        value: &EncodedValue,
    ) -> Result<EncodedValue> {
        let address = self.place(heap, value.bytes())?;
        let pointee = match value.ty().element() {
            Some(element) => element.clone(),
            None => value.ty().clone(),
        };
        let pointer_ty = pointee.pointer_to(heap.pointer_size());
        Ok(EncodedValue::from_int(
            pointer_ty,
            i128::from(address),
            heap.byte_order(),
        ))
    }

    /// Emit a validated plan: allocations and writes happen here only
    pub fn emit(&mut self, heap: &mut dyn RemoteHeap, plan: &EncodingPlan) -> Result<EncodedValue> {
        let mut bytes = Vec::with_capacity(plan.len());
        self.emit_node(heap, &plan.root, &mut bytes)?;
        Ok(EncodedValue::new(plan.ty.clone(), bytes, plan.byte_order))
    }

    fn emit_node(
        &mut self,
        heap: &mut dyn RemoteHeap,
        node: &PlanNode,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match node {
            PlanNode::Bytes(bytes) => out.extend_from_slice(bytes),
            PlanNode::Zeros(n) => out.resize(out.len() + n, 0),
            PlanNode::Concat(nodes) => {
                for node in nodes {
                    self.emit_node(heap, node, out)?;
                }
            }
            PlanNode::Overlay { size, layers } => {
                let mut buf = vec![0u8; *size];
                for layer in layers {
                    let mut bytes = Vec::new();
                    self.emit_node(heap, layer, &mut bytes)?;
                    overlay(&mut buf, &bytes);
                }
                out.extend_from_slice(&buf);
            }
            PlanNode::Allocate {
                contents,
                pointer_size,
            } => {
                let mut bytes = Vec::with_capacity(contents.len());
                self.emit_node(heap, contents, &mut bytes)?;
                let address = self.place(heap, &bytes)?;
                out.extend(encode_uint(
                    u128::from(address),
                    *pointer_size,
                    heap.byte_order(),
                ));
            }
        }
        Ok(())
    }

    /// Allocate `bytes.len()` bytes, record the block, then write the bytes
    fn place(&mut self, heap: &mut dyn RemoteHeap, bytes: &[u8]) -> Result<u64> {
        let address = heap.allocate(bytes.len())?;
        if address == 0 {
            return Err(ProbeError::target_access(format!(
                "target allocation of {} bytes returned NULL",
                bytes.len()
            )));
        }
        self.ledger.record(address, bytes.len());
        heap.write_memory(address, bytes)?;
        debug!("Placed {} bytes at {:#x}", bytes.len(), address);
        Ok(address)
    }

    /// Character array holding `text` and its terminating NUL (not allocated)
    pub fn string(&mut self, heap: &mut dyn RemoteHeap, text: &str) -> Result<EncodedValue> {
        let char_ty = heap.resolve_type("char")?;
        self.encode(heap, &char_ty.unsized_array_of(), &ValueTemplate::string(text))
    }

    /// `char *` to a NUL-terminated copy of `text` in target memory
    pub fn string_allocated(
        &mut self,
        heap: &mut dyn RemoteHeap,
        text: &str,
    ) -> Result<EncodedValue> {
        let value = self.string(heap, text)?;
        self.pointer_to(heap, &value)
    }

    /// Whether `address` is a live marshaller allocation
    pub fn owns(&self, address: u64) -> bool {
        self.ledger.contains(address)
    }

    pub fn allocated_addresses(&self) -> Vec<u64> {
        self.ledger.addresses()
    }

    pub fn allocation_count(&self) -> usize {
        self.ledger.count()
    }

    /// Stop tracking a block the target released itself
    pub fn forget(&mut self, address: u64) -> bool {
        self.ledger.forget(address).is_some()
    }

    /// Release every tracked allocation through the target's deallocation
    /// routine, once per address, and clear the set
    pub fn free_all(&mut self, heap: &mut dyn RemoteHeap) -> ReleaseReport {
        self.ledger.release_all(|entry| heap.release(entry.address))
    }
}
