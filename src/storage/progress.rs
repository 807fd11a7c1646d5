use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::BytesCallback;

pin_project! {
    /// 统计已读取字节数的流包装，每个分片回调一次
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        on_bytes: Option<BytesCallback>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, on_bytes: Option<BytesCallback>) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            on_bytes,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    if let Some(callback) = this.on_bytes {
                        callback(*this.bytes_sent);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
