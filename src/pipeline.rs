//! Key gathering and table dispatch.
//!
//! These are the verbs a flow routine drives the pipeline with: build a key
//! from bound fields, look it up in a table, and run the matched flow. A
//! dispatch chain is depth-bounded; exceeding the bound drops the packet and
//! is counted exactly once, at the dispatch that tripped it.

use crate::action::Instruction;
use crate::context::{Context, Decision, FieldId};
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::pool::Buffer;
use crate::port::{Frame, Port, DROP_PORT_ID, FLOOD_PORT_ID};
use crate::table::{Key, Table, TableId};
use tracing::trace;

/// Builds a key of exactly `key_width` bytes by concatenating the current
/// bytes of the named bound fields, in order. The key owns its bytes.
pub fn gather(ctx: &Context, key_width: usize, fields: &[FieldId]) -> Result<Key> {
    let mut bytes = Vec::with_capacity(key_width);
    for &id in fields {
        let binding = ctx.field_binding(id)?;
        bytes.extend_from_slice(ctx.field_bytes(binding)?);
    }
    if bytes.len() != key_width {
        return Err(Error::KeyShapeMismatch {
            expected: key_width,
            actual: bytes.len(),
        });
    }
    Ok(Key::from(bytes))
}

/// Gathers a key from `fields` and dispatches the context into table
/// `table_id`.
pub fn goto_table(
    dp: &Dataplane,
    ctx: &mut Context,
    table_id: TableId,
    fields: &[FieldId],
) -> Result<()> {
    let table = dp.table(table_id).ok_or(Error::Unknown {
        what: "table",
        id: table_id.to_string(),
    })?;
    dispatch(dp, &table, ctx, fields)
}

/// Dispatches a context into a table: gather, find, account the hit, run
/// the flow routine. The routine may dispatch again; the depth bound cuts
/// cycles.
pub fn dispatch(dp: &Dataplane, table: &Table, ctx: &mut Context, fields: &[FieldId]) -> Result<()> {
    if ctx.depth() >= dp.max_goto_depth() {
        dp.stats().pipeline_loops.inc();
        ctx.set_drop();
        return Err(Error::PipelineLoop(ctx.depth()));
    }
    ctx.incr_depth();
    let key = gather(ctx, table.key_width(), fields)?;
    let flow = table.find(&key);
    flow.hit(ctx.len());
    flow.execute(dp, table, ctx)
}

/// Runs an instruction sequence against a context.
pub fn execute_instructions(
    dp: &Dataplane,
    ctx: &mut Context,
    instructions: &[Instruction],
) -> Result<()> {
    for instruction in instructions {
        match instruction {
            Instruction::Apply(action) => action.execute(dp, ctx)?,
            Instruction::Write(action) => ctx.write_action(action.clone()),
            Instruction::Clear => ctx.clear_actions(),
            Instruction::Goto { table, fields } => goto_table(dp, ctx, *table, fields)?,
        }
    }
    Ok(())
}

/// Commits a processed context and hands its buffer onward: to the decided
/// port's transmit ring, to the flood fan-out, or back to the pool. Every
/// packet leaves here accounted as sent, flooded, or dropped.
pub fn egress(dp: &Dataplane, mut buffer: Buffer) {
    let decision = match buffer.ctx.commit(dp) {
        Ok(decision) => decision,
        Err(e) => {
            trace!(dataplane = dp.name(), "commit failed: {}", e);
            Decision::Drop
        }
    };
    match decision {
        Decision::None | Decision::Drop | Decision::Port(DROP_PORT_ID) => {
            drop_buffer(dp, buffer);
        }
        Decision::Flood | Decision::Port(FLOOD_PORT_ID) => {
            let accepted = dp
                .port_table()
                .flood(buffer.ctx.bytes(), buffer.ctx.ingress());
            if accepted == 0 {
                dp.stats().dropped.inc();
            }
            release(dp, buffer);
        }
        Decision::Port(id) => match dp.port_table().get(id) {
            Some(port) if port.is_up() => {
                if let Err(frame) = port.enqueue(Frame::Pooled(buffer)) {
                    dp.stats().dropped.inc();
                    if let Frame::Pooled(buffer) = frame {
                        release(dp, buffer);
                    }
                }
            }
            _ => {
                trace!(dataplane = dp.name(), port = id, "egress port unavailable");
                drop_buffer(dp, buffer);
            }
        },
    }
}

fn drop_buffer(dp: &Dataplane, buffer: Buffer) {
    let _ = dp.port_table().drop_port().send(buffer.ctx.bytes());
    dp.stats().dropped.inc();
    release(dp, buffer);
}

fn release(dp: &Dataplane, buffer: Buffer) {
    if let Err(e) = dp.pool().dealloc(buffer) {
        trace!(dataplane = dp.name(), "buffer release failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::app::Library;
    use crate::port::table::PortTable;
    use crate::runtime::Settings;
    use crate::table::{Flow, TableKind};
    use std::sync::Arc;

    fn test_dp() -> Arc<Dataplane> {
        Dataplane::new(
            "test",
            Arc::new(PortTable::new()),
            &Settings::default(),
            Library::inert(),
        )
    }

    fn ctx_with(bytes: &[u8]) -> Context {
        let mut ctx = Context::new(64, 32);
        ctx.storage_mut()[..bytes.len()].copy_from_slice(bytes);
        ctx.set_len(bytes.len()).unwrap();
        ctx
    }

    #[test]
    fn test_gather_concatenates_in_order() {
        let mut ctx = ctx_with(&[0x11, 0x22, 0x33, 0x44]);
        ctx.bind_field(1, 2, 2).unwrap();
        ctx.bind_field(2, 0, 1).unwrap();
        let key = gather(&ctx, 3, &[1, 2]).unwrap();
        assert_eq!(key.bytes(), &[0x33, 0x44, 0x11]);
    }

    #[test]
    fn test_gather_width_mismatch() {
        let mut ctx = ctx_with(&[1, 2, 3]);
        ctx.bind_field(1, 0, 2).unwrap();
        assert!(matches!(
            gather(&ctx, 3, &[1]),
            Err(Error::KeyShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_gather_unbound_field() {
        let ctx = ctx_with(&[1]);
        assert!(matches!(gather(&ctx, 1, &[5]), Err(Error::Unbound(5))));
    }

    #[test]
    fn test_gather_key_owns_bytes() {
        let mut ctx = ctx_with(&[0xaa, 0xbb]);
        ctx.bind_field(1, 0, 2).unwrap();
        let key = gather(&ctx, 2, &[1]).unwrap();
        ctx.bytes_mut()[0] = 0x00;
        // The key keeps the bytes it was gathered from.
        assert_eq!(key.bytes(), &[0xaa, 0xbb]);
    }

    #[test]
    fn test_goto_dispatches_matched_flow() {
        let dp = test_dp();
        let table = dp.create_table(0, 16, 1, TableKind::Exact).unwrap();
        table
            .insert(
                Key::new(&[0x42]),
                Flow::from_instructions(vec![Instruction::Apply(Action::Drop)]),
            )
            .unwrap();

        let mut ctx = ctx_with(&[0x42, 0x00]);
        ctx.bind_field(0, 0, 1).unwrap();
        goto_table(&dp, &mut ctx, 0, &[0]).unwrap();
        assert_eq!(ctx.decision(), Decision::Drop);
        assert_eq!(table.stats().lookups.get(), 1);
        assert_eq!(table.stats().hits.get(), 1);
    }

    #[test]
    fn test_goto_unknown_table() {
        let dp = test_dp();
        let mut ctx = ctx_with(&[1]);
        assert!(matches!(
            goto_table(&dp, &mut ctx, 9, &[]),
            Err(Error::Unknown { what: "table", .. })
        ));
    }

    #[test]
    fn test_goto_chain_across_tables() {
        let dp = test_dp();
        dp.create_table(0, 16, 1, TableKind::Exact).unwrap();
        dp.create_table(1, 16, 1, TableKind::Exact).unwrap();

        let t0 = dp.table(0).unwrap();
        t0.insert(
            Key::new(&[0x01]),
            Flow::from_instructions(vec![Instruction::Goto {
                table: 1,
                fields: vec![1],
            }]),
        )
        .unwrap();
        let t1 = dp.table(1).unwrap();
        t1.insert(
            Key::new(&[0x02]),
            Flow::from_instructions(vec![Instruction::Apply(Action::Drop)]),
        )
        .unwrap();

        let mut ctx = ctx_with(&[0x01, 0x02]);
        ctx.bind_field(0, 0, 1).unwrap();
        ctx.bind_field(1, 1, 1).unwrap();
        goto_table(&dp, &mut ctx, 0, &[0]).unwrap();

        assert_eq!(ctx.decision(), Decision::Drop);
        assert_eq!(t0.stats().lookups.get(), 1);
        assert_eq!(t1.stats().lookups.get(), 1);
    }

    #[test]
    fn test_dispatch_loop_is_cut_and_counted_once() {
        let dp = test_dp();
        let table = dp.create_table(0, 16, 1, TableKind::Exact).unwrap();
        // A flow that dispatches straight back into its own table.
        table
            .insert(
                Key::new(&[0x01]),
                Flow::from_instructions(vec![Instruction::Goto {
                    table: 0,
                    fields: vec![0],
                }]),
            )
            .unwrap();

        let mut ctx = ctx_with(&[0x01]);
        ctx.bind_field(0, 0, 1).unwrap();
        let err = goto_table(&dp, &mut ctx, 0, &[0]).unwrap_err();
        assert!(matches!(err, Error::PipelineLoop(_)));
        assert_eq!(dp.stats().pipeline_loops.get(), 1);
        assert_eq!(ctx.decision(), Decision::Drop);
        // The chain ran to the bound, no further.
        assert_eq!(
            table.stats().lookups.get(),
            dp.max_goto_depth() as u64
        );
    }

    #[test]
    fn test_commit_runs_action_list_in_order() {
        use crate::context::{AddressSpace, Field};
        let dp = test_dp();
        let mut ctx = ctx_with(&[0u8; 4]);
        ctx.write_action(Action::SetField {
            field: Field {
                space: AddressSpace::Packet,
                offset: 0,
                length: 2,
            },
            value: vec![0xbe, 0xef],
        });
        ctx.write_action(Action::Output(DROP_PORT_ID));
        ctx.write_action(Action::Drop);

        let decision = ctx.commit(&dp).unwrap();
        // Later terminal actions override earlier ones.
        assert_eq!(decision, Decision::Drop);
        assert_eq!(&ctx.bytes()[..2], &[0xbe, 0xef]);
        // The list ran exactly once.
        assert!(ctx.actions().is_empty());
    }

    #[test]
    fn test_instruction_sequence() {
        let dp = test_dp();
        let mut ctx = ctx_with(&[0u8; 4]);
        let instructions = vec![
            Instruction::Write(Action::Drop),
            Instruction::Clear,
            Instruction::Write(Action::Drop),
        ];
        execute_instructions(&dp, &mut ctx, &instructions).unwrap();
        assert_eq!(ctx.actions().len(), 1);
    }
}
