fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match sprintreader_setup::parse_mode(&args) {
        Some(mode) => std::process::exit(sprintreader_setup::run(mode)),
        None => {
            eprint!("{}", sprintreader_setup::USAGE);
            std::process::exit(2);
        }
    }
}
