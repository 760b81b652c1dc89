//! `sem2sir` command line driver.

use std::path::Path;
use std::process::ExitCode;

use sem_asm::{Intrinsic, OpId, TypeId};
use strum::IntoEnumIterator;

fn usage(argv0: &str) {
    eprintln!("usage:");
    eprintln!("  {argv0} --dump-profile");
    eprintln!("  {argv0} --check <stage4.ast.jsonl>");
    eprintln!("  {argv0} --emit-sir <stage4.ast.jsonl> --out <out.sir.jsonl>");
}

/// Proves the closed-vocabulary dictionaries are wired up bijectively.
fn dump_profile() -> ExitCode {
    for t in TypeId::iter() {
        if TypeId::parse(t.as_str()) != Some(t) {
            eprintln!("internal: type not in dictionary: {t}");
            return ExitCode::from(2);
        }
        println!("type {t}");
    }
    for op in OpId::iter() {
        if OpId::parse(op.as_str()) != Some(op) {
            eprintln!("internal: op not in dictionary: {op}");
            return ExitCode::from(2);
        }
        println!("op {op}");
    }
    for k in Intrinsic::iter() {
        if Intrinsic::parse(k.as_str()) != Some(k) {
            eprintln!("internal: intrinsic not in dictionary: {k}");
            return ExitCode::from(2);
        }
        println!("intrinsic {k}");
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let argv0 = args.first().map(String::as_str).unwrap_or("sem2sir");

    match args.get(1).map(String::as_str) {
        Some("--dump-profile") if args.len() == 2 => dump_profile(),
        Some("--check") if args.len() == 3 => {
            match sem2sir::check_file(Path::new(&args[2])) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("sem2sir: {}: {e}", args[2]);
                    ExitCode::from(1)
                }
            }
        }
        Some("--emit-sir") if args.len() == 5 && args[3] == "--out" => {
            match sem2sir::emit_file(Path::new(&args[2]), Path::new(&args[4])) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("sem2sir: {}: {e}", args[2]);
                    ExitCode::from(1)
                }
            }
        }
        _ => {
            usage(argv0);
            ExitCode::from(2)
        }
    }
}
