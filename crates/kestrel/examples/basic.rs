//! Basic example demonstrating the buffer queue.
//!
//! This example shows:
//! - Creating a queue and connecting both endpoints
//! - The dequeue / request / queue / acquire / release round trip
//! - Frame notifications via a `ConsumerListener`
//! - The producer and consumer running on separate threads
//!
//! Run with: `cargo run --example basic -p kestrel`

use std::sync::{mpsc, Arc};

use kestrel::prelude::*;
use kestrel::SoftFence;

/// Listener that forwards frame notifications to the consumer thread.
struct FrameSignal {
    tx: mpsc::Sender<()>,
}

impl ConsumerListener for FrameSignal {
    fn on_frame_available(&self) {
        let _ = self.tx.send(());
    }
}

const FRAMES: usize = 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .init();

    let (producer, consumer) = kestrel::create_pair(None);

    // Consumer side: register the listener and pick defaults. The queue
    // holds the listener weakly, so this Arc must stay alive for as long
    // as notifications should be delivered.
    let (frame_tx, frame_rx) = mpsc::channel();
    let listener = Arc::new(FrameSignal { tx: frame_tx });
    consumer.consumer_connect(listener.clone(), false)?;
    consumer.set_consumer_name("basic-example")?;
    consumer.set_default_buffer_size(64, 64)?;
    consumer.set_consumer_usage_bits(BufferUsage::CPU_READ)?;

    // Producer side.
    producer.connect(ProducerApi::Cpu, false)?;

    let render_thread = std::thread::spawn(move || -> Result<Producer, QueueError> {
        for n in 0..FRAMES {
            let dequeued = producer.dequeue_buffer(
                false,
                0, // use the default size
                0,
                PixelFormat::RGBA_8888,
                BufferUsage::CPU_WRITE,
            )?;
            let buffer = producer.request_buffer(dequeued.slot)?;

            // "Render": fill the frame with a shade derived from its index.
            buffer.with_bytes_mut(|px| px.fill(n as u8 * 50));

            // Signal the write fence immediately; a real renderer would
            // hand the fence to its graphics API instead.
            let write_fence = SoftFence::new();
            write_fence.signal();

            producer.queue_buffer(
                dequeued.slot,
                QueueBufferInput {
                    timestamp: (n as i64) * 16_000_000,
                    is_auto_timestamp: false,
                    crop: Rect::from_size(64, 64),
                    scaling_mode: ScalingMode::Freeze.as_raw(),
                    transform: TransformFlags::empty(),
                    async_mode: false,
                    fence: write_fence.as_fence(),
                },
            )?;
            println!("producer: queued frame {n}");
        }
        Ok(producer)
    });

    // Consumer side: composite each frame as it is announced.
    for _ in 0..FRAMES {
        frame_rx.recv()?;
        let frame = consumer.acquire_buffer(0)?;
        frame.fence.wait(kestrel::FENCE_WAIT_TIMEOUT);

        if let Some(buffer) = &frame.graphic_buffer {
            let shade = buffer.with_bytes(|px| px[0]);
            println!(
                "consumer: frame {} ({}x{}, shade {shade})",
                frame.frame_number,
                buffer.width(),
                buffer.height()
            );
        } else {
            println!("consumer: frame {} (cached handle)", frame.frame_number);
        }

        consumer.release_buffer(frame.slot, frame.frame_number, Fence::NO_FENCE)?;
    }

    let producer = render_thread.join().expect("render thread panicked")?;
    producer.disconnect(ProducerApi::Cpu)?;
    consumer.consumer_disconnect()?;

    println!("done");
    Ok(())
}
