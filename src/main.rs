use pipeline_runner::cli;

fn main() {
    std::process::exit(cli::run());
}
