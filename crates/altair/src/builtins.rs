//! Core builtin callables.
//!
//! These are the callables the world registers as shared variables at
//! startup: the file-print worker behind `Print #fd`, the keymap worker
//! behind `UseKeymap`, and the mutex commands. Game-specific commands
//! and the file I/O statements are registered by the host the same way.

use std::rc::Rc;

use crate::{
    error::Error,
    process::BuiltinEnv,
    value::{BuiltinCallable, CallableValue, Value},
};

/// Registers the core builtins into the world's shared variables.
pub fn register_builtins(world: &mut crate::world::World) {
    for builtin in [
        &CC_PRINT,
        &CC_USEKEYMAP,
        &LOCK,
        &UNLOCK,
        &GET_LOCK_INFO,
    ] {
        world.set_new_global_value(
            builtin.name,
            Value::Callable(CallableValue::Builtin(Rc::new(BuiltinCallable {
                name: builtin.name,
                is_procedure: builtin.is_procedure,
                min_args: builtin.min_args,
                max_args: builtin.max_args,
                handler: builtin.handler,
            }))),
        );
    }
}

static CC_PRINT: BuiltinCallable = BuiltinCallable {
    name: "CC$PRINT",
    is_procedure: true,
    min_args: 2,
    max_args: 2,
    handler: cc_print,
};

/// `CC$PRINT #fd, text`: writes one line to an open script file.
fn cc_print(env: &mut BuiltinEnv<'_>, args: Vec<Value>) -> Result<Option<Value>, Error> {
    let fd = match &args[0] {
        Value::File(fd) => *fd,
        Value::Null => return Ok(None),
        _ => return Err(Error::type_error()),
    };
    match &args[1] {
        Value::Null => Ok(None),
        text => {
            let line = text.to_text(false);
            env.world.file_table_mut().write_line(fd, &line)?;
            Ok(None)
        }
    }
}

static CC_USEKEYMAP: BuiltinCallable = BuiltinCallable {
    name: "CC$USEKEYMAP",
    is_procedure: true,
    min_args: 2,
    max_args: 2,
    handler: cc_use_keymap,
};

/// `CC$USEKEYMAP keymap, prefix`: requests the one-shot alternate
/// keymap for the next keypress.
fn cc_use_keymap(env: &mut BuiltinEnv<'_>, mut args: Vec<Value>) -> Result<Option<Value>, Error> {
    let prefix = args.pop().expect("argument count checked by caller");
    let keymap = match args.pop() {
        Some(Value::Keymap(index)) => index,
        _ => return Err(Error::type_error()),
    };
    env.world.set_pending_keymap(keymap, prefix);
    Ok(None)
}

static LOCK: BuiltinCallable = BuiltinCallable {
    name: "LOCK",
    is_procedure: true,
    min_args: 1,
    max_args: 2,
    handler: lock,
};

/// `Lock name [, hint]`: takes an advisory lock for this process.
fn lock(env: &mut BuiltinEnv<'_>, args: Vec<Value>) -> Result<Option<Value>, Error> {
    let name = string_arg(&args[0])?;
    let hint = match args.get(1) {
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_text(false),
    };
    let pid = env.process_id;
    env.world.mutex_list_mut().take(&name, &hint, pid)?;
    Ok(None)
}

static UNLOCK: BuiltinCallable = BuiltinCallable {
    name: "UNLOCK",
    is_procedure: true,
    min_args: 1,
    max_args: 1,
    handler: unlock,
};

/// `Unlock name`: releases a lock held by this process.
fn unlock(env: &mut BuiltinEnv<'_>, args: Vec<Value>) -> Result<Option<Value>, Error> {
    let name = string_arg(&args[0])?;
    let pid = env.process_id;
    env.world.mutex_list_mut().release(&name, pid)?;
    Ok(None)
}

static GET_LOCK_INFO: BuiltinCallable = BuiltinCallable {
    name: "GETLOCKINFO",
    is_procedure: false,
    min_args: 1,
    max_args: 1,
    handler: get_lock_info,
};

/// `GetLockInfo(name)`: the hint of a held lock, or null.
fn get_lock_info(env: &mut BuiltinEnv<'_>, args: Vec<Value>) -> Result<Option<Value>, Error> {
    let name = string_arg(&args[0])?;
    Ok(Some(
        env.world
            .mutex_list()
            .info(&name)
            .map_or(Value::Null, Value::str),
    ))
}

fn string_arg(value: &Value) -> Result<String, Error> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        _ => Err(Error::type_error()),
    }
}
