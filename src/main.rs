fn main() {
    if let Err(err) = storkwatch_lib::run() {
        log::error!("{err:#}");
        eprintln!("storkwatch: {err:#}");
        std::process::exit(1);
    }
}
