fn main() {
    if let Err(e) = cprobe::cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(cprobe::cli::exit_code(&e));
    }
}
