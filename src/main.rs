fn main() -> anyhow::Result<()> {
    arcade_rewards_lib::run()
}
