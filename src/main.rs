fn main() -> std::process::ExitCode {
    stillgrab_lib::run()
}
