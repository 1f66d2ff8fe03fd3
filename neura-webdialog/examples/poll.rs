use std::time::Duration;

use neura_webdialog::*;

// Logs in once and then prints the named elements of the schema page every few seconds, re-using the session until the
// controller drops it.
#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args
        .next()
        .expect("must pass host/IP of the heat pump as first argument");
    let user = std::env::var("NEURA_USER").unwrap_or_default();
    let password = std::env::var("NEURA_PASSWORD").unwrap_or_default();
    let ids: Vec<String> = args.collect();

    let client = ClientBuilder::new(host)
        .credentials(user, password)
        .build()?;
    let session = client.login().await?;
    let url = client.page_url("schema.jsp")?;

    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tick.tick().await;
        let body = client.fetch(&url, &session).await?;
        let page = Page::parse(&body);
        for id in &ids {
            println!("{} = {:?}", id, page.element_value(id));
        }
    }
}
