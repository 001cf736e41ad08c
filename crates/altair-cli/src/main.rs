//! Script driver: compiles one file and runs it to quiescence.

use std::{env, fs, process::ExitCode};

use altair::{CollectStringPrint, ProcessState, World};

fn main() -> ExitCode {
    let mut file_path = None;
    let mut optimisation_level = 1;
    let mut json = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "-O" => {
                let Some(level) = args.next().and_then(|v| v.parse().ok()) else {
                    eprintln!("error: -O needs a level between -1 and 3");
                    return ExitCode::FAILURE;
                };
                optimisation_level = level;
            }
            "--help" | "-h" => {
                eprintln!("usage: altair [-O level] [--json] script.q");
                return ExitCode::SUCCESS;
            }
            path => file_path = Some(path.to_owned()),
        }
    }
    let Some(file_path) = file_path else {
        eprintln!("usage: altair [-O level] [--json] script.q");
        return ExitCode::FAILURE;
    };

    let content = match fs::read(&file_path) {
        Ok(content) => content,
        Err(err) => {
            eprintln!("error: {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let sink = CollectStringPrint::new();
    let output = sink.output();
    let trace = sink.trace();
    let mut world = if json {
        World::with_console(Box::new(sink))
    } else {
        World::new()
    };

    let bco = match world.compile_file(&file_path, &content, "cli", optimisation_level) {
        Ok(bco) => bco,
        Err(err) => {
            if json {
                print_json(&[], &[format!("{err}")], "compile-error");
            } else {
                eprintln!("error: {err}");
            }
            return ExitCode::FAILURE;
        }
    };

    let pid = world.process_list_mut().create_process(&file_path, 50);
    let group = world.process_list_mut().allocate_process_group();
    if let Some(process) = world.process_list_mut().get_mut(pid) {
        process.push_frame(bco, false);
    }
    if let Err(err) = world.process_list_mut().resume_process(pid, group) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    world.process_list_mut().start_process_group(group);
    world.run();

    let state = world
        .process_list()
        .get(pid)
        .map_or(ProcessState::Terminated, altair::Process::state);
    if json {
        let output = output.borrow().clone();
        let trace = trace.borrow().clone();
        print_json(&output, &trace, state_name(state));
    }
    match state {
        ProcessState::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn state_name(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Ended => "ended",
        ProcessState::Failed => "failed",
        ProcessState::Terminated => "terminated",
        ProcessState::Suspended => "suspended",
        ProcessState::Frozen => "frozen",
        ProcessState::Waiting => "waiting",
        ProcessState::Runnable | ProcessState::Running => "running",
    }
}

fn print_json(output: &[String], trace: &[String], state: &str) {
    let report = serde_json::json!({
        "state": state,
        "output": output,
        "trace": trace,
    });
    println!("{report}");
}
