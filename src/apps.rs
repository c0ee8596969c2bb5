//! Built-in applications.
//!
//! Small libraries that drive the whole verb surface, used by the host
//! binary and as working examples of how an application programs the
//! dataplane.

use crate::action::{Action, Instruction};
use crate::app::Library;
use crate::pipeline;
use crate::port::{Port, PortId};
use crate::table::{Flow, Key, TableKind};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Patches packets between two named ports: whatever arrives on one leaves
/// on the other.
pub fn wire(a: &str, b: &str) -> Library {
    let names = (a.to_string(), b.to_string());
    let pair: Arc<Mutex<Option<(PortId, PortId)>>> = Arc::new(Mutex::new(None));

    let resolved = Arc::clone(&pair);
    let load = move |dp: &crate::dataplane::Dataplane| -> i32 {
        let a = match dp.port_table().get_by_name(&names.0) {
            Some(port) => port.id(),
            None => {
                warn!(port = %names.0, "wire: port not found");
                return 1;
            }
        };
        let b = match dp.port_table().get_by_name(&names.1) {
            Some(port) => port.id(),
            None => {
                warn!(port = %names.1, "wire: port not found");
                return 1;
            }
        };
        *resolved.lock().unwrap() = Some((a, b));
        info!("wire: patched {} <-> {}", a, b);
        0
    };

    let lookup = Arc::clone(&pair);
    let process = move |_dp: &crate::dataplane::Dataplane,
                        ctx: &mut crate::context::Context|
          -> i32 {
        match *lookup.lock().unwrap() {
            Some((a, b)) if ctx.ingress() == a => ctx.set_output(b),
            Some((a, b)) if ctx.ingress() == b => ctx.set_output(a),
            _ => ctx.set_drop(),
        }
        0
    };

    Library::new(load, |_| 0, |_| 0, |_| 0, process)
}

/// Floods every packet to all other live ports.
pub fn hub() -> Library {
    Library::new(
        |_| 0,
        |_| 0,
        |_| 0,
        |_| 0,
        |_dp, ctx| {
            ctx.set_flood();
            0
        },
    )
}

/// Drops every packet.
pub fn sink() -> Library {
    Library::new(
        |_| 0,
        |_| 0,
        |_| 0,
        |_| 0,
        |_dp, ctx| {
            ctx.set_drop();
            0
        },
    )
}

/// Switches on the first payload byte through an exact-match table: each
/// rule sends one byte value to one named port, everything else drops via
/// the table's miss flow.
pub fn byte_switch(rules: Vec<(u8, String)>) -> Library {
    const TABLE: u32 = 0;
    const FIRST_BYTE: u32 = 0;

    let load = move |dp: &crate::dataplane::Dataplane| -> i32 {
        let table = match dp.create_table(TABLE, 256, 1, TableKind::Exact) {
            Ok(table) => table,
            Err(e) => {
                warn!("byte_switch: create table failed: {}", e);
                return 1;
            }
        };
        for (byte, port_name) in &rules {
            let port = match dp.port_table().get_by_name(port_name) {
                Some(port) => port,
                None => {
                    warn!(port = %port_name, "byte_switch: port not found");
                    return 1;
                }
            };
            let flow =
                Flow::from_instructions(vec![Instruction::Apply(Action::Output(port.id()))]);
            if let Err(e) = table.insert(Key::new(&[*byte]), flow) {
                warn!("byte_switch: install failed: {}", e);
                return 1;
            }
        }
        table.insert_miss(Flow::from_instructions(vec![Instruction::Apply(
            Action::Drop,
        )]));
        info!(rules = rules.len(), "byte_switch: table installed");
        0
    };

    let process = |dp: &crate::dataplane::Dataplane, ctx: &mut crate::context::Context| -> i32 {
        if ctx.is_empty() {
            ctx.set_drop();
            return 0;
        }
        ctx.bind_header(0);
        if ctx.bind_field(FIRST_BYTE, 0, 1).is_err() {
            ctx.set_drop();
            return 0;
        }
        match pipeline::goto_table(dp, ctx, TABLE, &[FIRST_BYTE]) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    };

    Library::new(load, |_| 0, |_| 0, |_| 0, process)
}

/// Resolves a configured application name to its library.
pub fn by_name(name: &str, port_names: &[String]) -> Option<Library> {
    match name {
        "wire" => {
            if port_names.len() != 2 {
                return None;
            }
            Some(wire(&port_names[0], &port_names[1]))
        }
        "hub" => Some(hub()),
        "sink" => Some(sink()),
        _ => None,
    }
}
