//! Actions and instructions.
//!
//! An [`Action`] mutates a packet context or marks its egress decision; an
//! [`Instruction`] tells the pipeline what to do with actions: run one now,
//! stage one on the context's action list, clear the list, or dispatch into
//! another table.
//!
//! The original drop action carried a group tag with no defined meaning; it
//! is reserved and not modeled here.

use crate::context::{Context, Field, FieldId};
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::port::PortId;
use crate::table::TableId;

/// One packet-level action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Validates that the field is addressable. Its value is read through
    /// [`Context::read_field`].
    GetField(Field),
    /// Overwrites a field with `value`; the value length must equal the
    /// field length.
    SetField { field: Field, value: Vec<u8> },
    /// Copies a field's bytes to `to` in the opposite address space.
    CopyField { field: Field, to: u16 },
    /// Marks the context for output on a port. The port must exist when the
    /// action executes.
    Output(PortId),
    /// Tags the context with an egress queue.
    Queue(u32),
    /// Tags the context with a group.
    Group(u32),
    /// Marks the context as dropped.
    Drop,
}

impl Action {
    /// Applies this action to a context.
    pub fn execute(&self, dp: &Dataplane, ctx: &mut Context) -> Result<()> {
        match self {
            Action::GetField(field) => ctx.read_field(*field).map(|_| ()),
            Action::SetField { field, value } => ctx.write_field(*field, value),
            Action::CopyField { field, to } => ctx.copy_field(*field, *to),
            Action::Output(port) => {
                if dp.port_table().get(*port).is_none() {
                    return Err(Error::Unknown {
                        what: "port",
                        id: port.to_string(),
                    });
                }
                ctx.set_output(*port);
                Ok(())
            }
            Action::Queue(queue) => {
                ctx.set_queue(*queue);
                Ok(())
            }
            Action::Group(group) => {
                ctx.set_group(*group);
                Ok(())
            }
            Action::Drop => {
                ctx.set_drop();
                Ok(())
            }
        }
    }
}

/// One pipeline instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Execute the action immediately.
    Apply(Action),
    /// Append the action to the context's action list.
    Write(Action),
    /// Empty the context's action list.
    Clear,
    /// Gather a key from the named fields and dispatch into another table.
    Goto {
        table: TableId,
        fields: Vec<FieldId>,
    },
}
