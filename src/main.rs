/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The `mksfs` tool creates a simple filesystem on a device or a plain file.

use sfs::SimpleFileSystem;
use sfs::fs::is_present;
use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the device file on which the filesystem will be created.
    device_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res = Args::default();
    for arg in env::args_os().skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => res.device_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" mksfs [-h] <device>");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -h:\t\tprints usage");
    eprintln!(" device:\tthe device or file on which the filesystem is created");
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("mksfs: error: {msg}");
    exit(1);
}

/// Shows a prompt and reads one line from stdin.
fn prompt(text: &str) -> Option<String> {
    print!("{text}");
    let _ = io::stdout().flush();
    io::stdin().lock().lines().next()?.ok()
}

fn main() {
    let args = parse_args();
    if args.help {
        print_usage();
        exit(0);
    }
    let device_path = args.device_path.unwrap_or_else(|| {
        error("specify path to a device");
    });

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&device_path)
        .unwrap_or_else(|e| {
            error(format_args!("{}: {e}", device_path.display()));
        });
    let present = is_present(&mut file).unwrap_or_else(|e| {
        error(format_args!("{}: {e}", device_path.display()));
    });
    drop(file);
    if present {
        println!(
            "{} already contains a simple filesystem",
            device_path.display()
        );
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    SimpleFileSystem::format(&device_path).unwrap_or_else(|e| {
        error(format_args!("failed to create filesystem: {e}"));
    });
}
