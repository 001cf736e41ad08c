#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the script integer model")]
#![expect(clippy::missing_panics_doc, reason = "documented panics are internal invariants")]

mod atom;
mod bco;
mod builtins;
pub mod compiler;
mod context;
mod error;
mod expr;
mod filetable;
mod io;
mod keymap;
mod mutex;
mod names;
pub mod opcode;
mod ops;
mod optimizer;
mod process;
mod process_list;
pub mod selection;
pub mod serialize;
mod tokenizer;
mod types;
mod value;
mod world;

pub use crate::{
    atom::AtomTable,
    bco::{BytecodeObject, Label},
    builtins::register_builtins,
    context::{
        Context, ContextValue, GlobalContext, ObjectRef, PropertyAcceptor, PropertyIndex,
        StructContext, context_for_value,
    },
    error::Error,
    expr::{BuiltinFunction, LogicalOp, Node, Parser, lookup_builtin_function},
    filetable::{FileTable, MAX_FILES},
    io::{CollectStringPrint, PrintWriter, StdPrint},
    keymap::{KMOD_ALT, KMOD_CTRL, KMOD_META, KMOD_SHIFT, Keymap, KeymapTable, parse_key},
    mutex::MutexList,
    names::{NameIndex, NameMap, Segment},
    ops::{blob_get_int, blob_set_int, execute_binary, execute_ternary, execute_unary},
    optimizer::optimize,
    process::{BuiltinEnv, Finalizer, Process, ProcessState},
    process_list::{GroupFinishHandler, ProcessGroupId, ProcessId, ProcessList},
    tokenizer::{Token, Tokenizer},
    types::{ArrayValue, HashValue, StructureTypeDef, StructureValue},
    value::{BcoRef, BuiltinCallable, BuiltinHandler, CallableValue, Value},
    world::{GlobalStore, ObjectPropertyStore, PendingKeymap, World},
};
