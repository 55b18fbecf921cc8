use clap::Parser;
use std::path::PathBuf;

use snexc::backend::ExtArg;
use snexc::session::CompilationSession;
use snexc::types::Type;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Tokens,
    Ast,
    Diagnostics,
    Run,
}

#[derive(Parser, Debug)]
#[command(
    name = "snexc",
    version,
    about = "SNEX compiler — compiles .snex DSP callback sources into callable native objects"
)]
struct Cli {
    /// Input .snex source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Run)]
    emit: EmitStage,

    /// Entry point called with --emit run
    #[arg(long, default_value = "main")]
    entry: String,

    /// Numeric arguments passed to the entry point (repeatable)
    #[arg(long = "arg")]
    args: Vec<f64>,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("snexc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    match cli.emit {
        EmitStage::Tokens => emit_tokens(&source),
        EmitStage::Ast => emit_ast(&source, cli.verbose),
        EmitStage::Diagnostics => emit_diagnostics(&source, cli.verbose),
        EmitStage::Run => run(&source, &cli),
    }
}

fn print_timings(session: &CompilationSession) {
    for t in session.timings() {
        eprintln!("snexc: {:<20} {:?}", t.pass.to_string(), t.duration);
    }
}

fn emit_tokens(source: &str) {
    let result = snexc::lexer::lex(source);
    for (token, span) in &result.tokens {
        println!("{}..{}\t{:?}", span.start, span.end, token);
    }
    if !result.errors.is_empty() {
        for e in &result.errors {
            eprintln!("snexc: lex error at {}..{}: {}", e.span.start, e.span.end, e.message);
        }
        std::process::exit(1);
    }
}

fn emit_ast(source: &str, verbose: bool) {
    let mut session = CompilationSession::new(source);
    if let Err(e) = session.run_to(snexc::pass::PassId::Parse) {
        eprintln!("snexc: {}", e);
        std::process::exit(1);
    }
    if verbose {
        print_timings(&session);
    }
    println!("{:#?}", session.items());
}

fn emit_diagnostics(source: &str, verbose: bool) {
    let mut session = CompilationSession::new(source);
    let result = session.compile();
    if verbose {
        print_timings(&session);
    }
    match result {
        Ok(_) => println!("[]"),
        Err(e) => {
            match serde_json::to_string_pretty(&e) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("snexc: error: {}", err);
                    std::process::exit(2);
                }
            }
            std::process::exit(1);
        }
    }
}

fn run(source: &str, cli: &Cli) {
    let mut session = CompilationSession::new(source);
    let obj = match session.compile() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("snexc: {}", e);
            std::process::exit(1);
        }
    };
    if cli.verbose {
        print_timings(&session);
        eprintln!("snexc: provenance sha256:{}", obj.provenance);
        eprintln!("snexc: {} functions", obj.program.num_functions());
    }

    let Some(entry) = obj.entry(&cli.entry) else {
        eprintln!("snexc: error: no entry point named `{}`", cli.entry);
        std::process::exit(1);
    };
    if entry.arg_types.len() != cli.args.len() {
        eprintln!(
            "snexc: error: `{}` takes {} argument(s), {} given",
            cli.entry,
            entry.arg_types.len(),
            cli.args.len()
        );
        std::process::exit(1);
    }
    let mut args = Vec::with_capacity(cli.args.len());
    for (ty, v) in entry.arg_types.iter().zip(&cli.args) {
        match ty {
            Type::Int => args.push(ExtArg::Int(*v as i64)),
            Type::Float => args.push(ExtArg::Float(*v as f32)),
            Type::Double => args.push(ExtArg::Double(*v)),
            other => {
                eprintln!("snexc: error: cannot pass a `{:?}` argument from the command line", other);
                std::process::exit(1);
            }
        }
    }

    let mut instance = obj.new_instance();
    let out = entry.call(&mut instance, &mut args);
    println!("{:?}", out);
}
