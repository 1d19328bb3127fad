fn main() {
    if let Err(e) = fleetnetd_cmd::cmd::run() {
        eprintln!("fleetnetd: {e}");
        std::process::exit(1);
    }
}
