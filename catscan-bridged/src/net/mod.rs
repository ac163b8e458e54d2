pub mod addrs;
