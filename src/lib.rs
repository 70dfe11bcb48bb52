//! rchat: a federated, address-routed chat relay.
//!
//! Clients sign up or log in, open a duplex event stream, and send
//! messages to `@`-joined addresses. Each relay hop consumes one address
//! segment, so `remote@bob` reaches `bob` on the relay linked as `remote`.

pub mod relay;
