/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use minirel::frontend::{self, Command, Output};
use minirel::Engine;

use std::io::{self, BufRead, Write};

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "minirel.db".to_string());
    let mut engine = match Engine::open(&path) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("could not open database '{}': {}", path, e);
            std::process::exit(1);
        }
    };

    println!("minirel shell ('{}')", path);
    println!("enter HELP for usage hints");

    let stdin = io::stdin();
    loop {
        print!("# ");
        io::stdout().flush().unwrap();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("input error: {}", e);
                break;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match frontend::parse(line) {
            Ok(command) => command,
            Err(msg) => {
                println!("parse error: {}", msg);
                continue;
            }
        };
        if command == Command::Exit {
            break;
        }

        match frontend::execute(&mut engine, command) {
            Ok(Output::Done) => println!("ok"),
            Ok(Output::Table { header, rows }) => {
                println!("{}", header.join(" | "));
                let count = rows.len();
                for row in rows {
                    let cells: Vec<String> = row.iter().map(frontend::format_value).collect();
                    println!("{}", cells.join(" | "));
                }
                println!("({} rows)", count);
            }
            Ok(Output::Help) => println!("{}", frontend::HELP_TEXT),
            Err(e) => println!("error: {}", e),
        }
    }

    if let Err(e) = engine.shutdown() {
        eprintln!("shutdown failed: {}", e);
        std::process::exit(1);
    }
}
