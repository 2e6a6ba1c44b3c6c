fn main() -> anyhow::Result<()> {
    brainplaner_lib::run()
}
