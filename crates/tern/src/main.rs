use std::sync::Arc;

use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use tern::config::Config;
use tern::{LocalNamespace, Runtime, StringTable, TernError};

#[derive(Parser)]
#[command(name = "tern", about = "tern: S-expressions compiled to a portable stack bytecode")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// File to execute
    file: Option<String>,

    /// Evaluate an expression
    #[arg(short, long)]
    eval: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive read-compile-run loop
    Client,
    /// Compile the first form of a file to a binary instruction stream
    Compile {
        file: String,
        #[arg(short, long)]
        output: String,
    },
    /// Run a binary instruction stream
    Exec { file: String },
    /// List the instructions in a binary instruction stream
    Disasm { file: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(
        etcd = %config.etcd_endpoint(),
        proxy = %config.proxy_endpoint(),
        on_complete = %config.on_complete_addr(),
        "loaded configuration"
    );

    let namespace = Arc::new(LocalNamespace::new(config.etcd_endpoint()));
    let mut runtime = Runtime::builder().with_namespace(namespace).build();

    let outcome = match (&cli.command, &cli.eval, &cli.file) {
        (Some(Command::Compile { file, output }), _, _) => compile_file(file, output),
        (Some(Command::Exec { file }), _, _) => exec_file(&mut runtime, file),
        (Some(Command::Disasm { file }), _, _) => disasm_file(file),
        (Some(Command::Client), _, _) | (None, None, None) => {
            repl(runtime);
            Ok(())
        }
        (None, Some(expr), _) => runtime.eval(expr).map(|_| ()),
        (None, None, Some(file)) => run_file(&mut runtime, file),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_source(path: &str) -> Result<String, TernError> {
    std::fs::read_to_string(path).map_err(|e| TernError::Io(format!("{path}: {e}")))
}

/// Run each top-level form of a file in turn against one set of definitions.
fn run_file(runtime: &mut Runtime, path: &str) -> Result<(), TernError> {
    let content = read_source(path)?;
    for form in tern::read_many(&content)? {
        runtime.eval_form(&form)?;
    }
    Ok(())
}

/// The string table for a stream lives next to it as `<stream>.syms`.
fn table_path(path: &str) -> String {
    format!("{path}.syms")
}

fn compile_file(path: &str, output: &str) -> Result<(), TernError> {
    let content = read_source(path)?;
    let form = tern::read(&content)?;
    let code = tern::compile(&form)?;
    let mut file =
        std::fs::File::create(output).map_err(|e| TernError::Io(format!("{output}: {e}")))?;
    tern_vm::write_to(&mut file, &code)?;

    let table = StringTable::for_code(&code);
    let syms = table_path(output);
    std::fs::write(&syms, table.encode()).map_err(|e| TernError::Io(format!("{syms}: {e}")))?;
    tracing::info!(
        instructions = code.len(),
        strings = table.len(),
        output,
        "wrote instruction stream"
    );
    Ok(())
}

fn load_stream(path: &str) -> Result<Vec<tern::Instruction>, TernError> {
    let bytes = std::fs::read(path).map_err(|e| TernError::Io(format!("{path}: {e}")))?;
    let syms = table_path(path);
    match std::fs::read(&syms) {
        Ok(table) => tern::deserialize_with_table(&bytes, &StringTable::decode(&table)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => tern::deserialize(&bytes),
        Err(e) => Err(TernError::Io(format!("{syms}: {e}"))),
    }
}

fn exec_file(runtime: &mut Runtime, path: &str) -> Result<(), TernError> {
    let code = load_stream(path)?;
    runtime.run(code).map(|_| ())
}

fn disasm_file(path: &str) -> Result<(), TernError> {
    let code = load_stream(path)?;
    print!("{}", tern::disassemble(&code, Some(path)));
    Ok(())
}

fn repl(mut runtime: Runtime) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: failed to create editor: {e}");
            std::process::exit(1);
        }
    };
    let history_path = dirs_path().join("history.txt");
    let _ = rl.load_history(&history_path);

    println!("tern v{}", env!("CARGO_PKG_VERSION"));
    println!("Type ,help for help, ,quit to exit\n");

    let mut buffer = String::new();
    let mut in_multiline = false;
    let mut show_disasm = false;

    loop {
        let prompt = if in_multiline { "  ... " } else { "tern> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();

                if !in_multiline {
                    let mut words = trimmed.split_whitespace();
                    match (words.next(), words.next()) {
                        (Some(",quit" | ",exit" | ",q"), _) => break,
                        (Some(",help" | ",h"), _) => {
                            print_help();
                            continue;
                        }
                        (Some(",dis"), _) => {
                            show_disasm = !show_disasm;
                            let state = if show_disasm { "on" } else { "off" };
                            println!("disassembly {state}");
                            continue;
                        }
                        (Some(",env"), _) => {
                            print_env(&runtime);
                            continue;
                        }
                        (Some(",share"), Some(name)) => {
                            if let Err(e) = runtime.share(name) {
                                eprintln!("Error: {e}");
                            }
                            continue;
                        }
                        (Some(",import"), Some(name)) => {
                            match runtime.import(name) {
                                Ok(val) => println!("{name} = {val}"),
                                Err(e) => eprintln!("Error: {e}"),
                            }
                            continue;
                        }
                        _ => {}
                    }
                }

                if in_multiline {
                    buffer.push('\n');
                    buffer.push_str(&line);
                } else {
                    buffer = line.clone();
                }

                if !is_balanced(&buffer) {
                    in_multiline = true;
                    continue;
                }

                in_multiline = false;
                let input = buffer.trim().to_string();
                buffer.clear();

                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(&input);

                let code = match runtime.compile_source(&input) {
                    Ok(code) => code,
                    Err(e) => {
                        eprintln!("Error: {e}");
                        continue;
                    }
                };
                if show_disasm {
                    print!("{}", tern::disassemble(&code, None));
                }
                // END_CODE prints the result itself.
                if let Err(e) = runtime.run(code) {
                    eprintln!("Error: {e}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                if in_multiline {
                    buffer.clear();
                    in_multiline = false;
                    println!("^C");
                    continue;
                }
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(dirs_path());
    let _ = rl.save_history(&history_path);
    println!("Goodbye!");
}

fn is_balanced(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut in_comment = false;
    for ch in input.chars() {
        if in_comment {
            in_comment = ch != '\n';
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            ';' => in_comment = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !in_string
}

fn print_help() {
    println!("tern REPL Commands:");
    println!("  ,quit / ,q      Exit the REPL");
    println!("  ,help / ,h      Show this help");
    println!("  ,dis            Toggle the instruction listing before each run");
    println!("  ,env            Show top-level definitions");
    println!("  ,share NAME     Publish a definition to the shared namespace");
    println!("  ,import NAME    Define NAME from the shared namespace");
    println!();
    println!("Special forms:");
    println!("  quote define set begin cond and or lambda loop");
    println!("Natives:");
    println!("  + - * / % = != > >= < <= print println car cdr random-id");
    println!("  array array-get array-set array-len array-push");
    println!("  hashmap hashmap-get hashmap-set hashmap-len hashmap-keys hashmap-delete");
}

fn print_env(runtime: &Runtime) {
    let globals = runtime.globals();
    let names = globals.local_names();
    if names.is_empty() {
        println!("(no definitions)");
        return;
    }
    for name in names {
        if let Some(val) = globals.get(name) {
            println!("  {} = {val}", tern::resolve(name));
        }
    }
}

fn dirs_path() -> std::path::PathBuf {
    dirs_home().join(".tern")
}

fn dirs_home() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
}
