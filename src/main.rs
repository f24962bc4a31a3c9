#[tokio::main]
async fn main() {
    podsync_lib::run().await
}
