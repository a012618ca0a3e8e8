use std::net::SocketAddr;

use structopt::StructOpt;

use rretain_utils::{NodeAddr, NodeId};

#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(name = "rretaind", about = "Cluster-aware retained message store node")]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Node id
    #[structopt(name = "id", long)]
    pub node_id: Option<NodeId>,

    ///gRPC listen address for peer traffic, --laddr 0.0.0.0:5363
    #[structopt(name = "laddr", long)]
    pub laddr: Option<SocketAddr>,

    ///Peer node address list, --peers "2@127.0.0.1:5364" "3@127.0.0.1:5365"
    #[structopt(name = "peers", long)]
    pub peers: Option<Vec<NodeAddr>>,
}
