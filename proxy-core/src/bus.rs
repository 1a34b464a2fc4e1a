//! The event bus connecting the two socket pumps to the mapper worker.
//!
//! A single ordered queue of typed items with exactly one consumer and
//! multiple producers: a terminator item (`Shutdown`) causes the consumer
//! to exit once drained. Bridges per-connection tasks to the shared mapper
//! consumer via `tokio::sync::mpsc` — an unbounded channel, since producers
//! must never block on a full queue; suspension points are limited to
//! socket reads, bus waits, and subprocess waits, never backpressure from a
//! bounded mapper queue.
//!
//! Carries the already-decoded [`crate::xml::XmlEvent`] rather than a raw
//! `(kind, bytes)` pair, since the server pump already owns a live
//! [`crate::xml::XmlTokenizer`] and re-serializing its output only to
//! re-parse it on the mapper side would be pure overhead. Recorded in
//! DESIGN.md.

use tokio::sync::mpsc;

use crate::xml::XmlEvent;

/// One item carried on the bus, in arrival order.
#[derive(Debug)]
pub enum BusItem {
    /// A line of client-originated text, not yet checked against the
    /// mapper command registry: the mapper worker alone owns
    /// `dispatch_command`, so every client line is posted here and the
    /// worker decides whether to intercept or forward it.
    ClientLine(String),
    /// A decoded room-protocol event from the server stream.
    MudEvent(XmlEvent),
    /// Sentinel: either pump signals shutdown by posting this; the mapper
    /// drains any remaining items, then exits.
    Shutdown,
}

pub type BusSender = mpsc::UnboundedSender<BusItem>;
pub type BusReceiver = mpsc::UnboundedReceiver<BusItem>;

/// Create a fresh bus. Clone the returned sender for each producer task
/// (client pump, server pump); the single receiver belongs to the mapper
/// worker task.
pub fn channel() -> (BusSender, BusReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_preserved_across_producers() {
        let (tx, mut rx) = channel();
        let tx2 = tx.clone();

        tx.send(BusItem::ClientLine("look".to_string())).unwrap();
        tx2.send(BusItem::MudEvent(XmlEvent::Line("The orc hits you.".to_string())))
            .unwrap();
        tx.send(BusItem::Shutdown).unwrap();
        drop(tx);
        drop(tx2);

        assert!(matches!(rx.recv().await, Some(BusItem::ClientLine(l)) if l == "look"));
        assert!(matches!(rx.recv().await, Some(BusItem::MudEvent(XmlEvent::Line(_)))));
        assert!(matches!(rx.recv().await, Some(BusItem::Shutdown)));
        assert!(rx.recv().await.is_none());
    }
}
