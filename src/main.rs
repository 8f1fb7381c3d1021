fn main() {
    if let Err(err) = quick_tags::entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
