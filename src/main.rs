fn main() {
    console_lib::run()
}
