use std::sync::Arc;

use pathgraph::{walk, Graph, GraphConfig, WalkOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let path = std::env::args().nth(1).expect("must supply a directory to walk");
    let follow = std::env::args().any(|a| a == "--follow");

    let graph = Arc::new(Graph::new(GraphConfig::new().cwd(path.clone())).expect("invalid cwd"));
    let root = graph.path(&path);

    let opts = WalkOptions::new().follow(follow);
    let entries = walk(&graph, root, &opts).await;

    println!("{} entries under {}", entries.len(), path);
    for id in entries {
        println!("{}", graph.fullpath(id));
    }
}
