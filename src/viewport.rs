//! Viewport context observed by the layout scaler

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportContext {
    /// Width of the container the preview is laid out in, in CSS px
    pub container_width: f32,
    /// Device pixel ratio of the display. Never influences export output.
    pub dpr: f32,
}

impl Default for ViewportContext {
    fn default() -> Self {
        Self {
            container_width: 1280.0,
            dpr: 1.0,
        }
    }
}

/// Source of resize events. Each `resize` publishes a new context to every subscriber.
#[derive(Debug)]
pub struct ViewportObserver {
    tx: watch::Sender<ViewportContext>,
}

impl ViewportObserver {
    pub fn new(initial: ViewportContext) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn resize(&self, container_width: f32) {
        self.tx.send_modify(|ctx| ctx.container_width = container_width);
    }

    pub fn set_context(&self, ctx: ViewportContext) {
        self.tx.send_replace(ctx);
    }

    pub fn context(&self) -> ViewportContext {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewportContext> {
        self.tx.subscribe()
    }
}

impl Default for ViewportObserver {
    fn default() -> Self {
        Self::new(ViewportContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_context_can_be_updated() {
        let v = ViewportObserver::default();
        assert_eq!(v.context().container_width, 1280.0);
        v.set_context(ViewportContext {
            container_width: 360.0,
            dpr: 3.0,
        });
        let c = v.context();
        assert_eq!(c.container_width, 360.0);
        assert_eq!(c.dpr, 3.0);
        v.resize(400.0);
        assert_eq!(v.context().container_width, 400.0);
        assert_eq!(v.context().dpr, 3.0);
    }

    #[test]
    fn subscribers_see_resizes() {
        let v = ViewportObserver::default();
        let mut rx = v.subscribe();
        v.resize(640.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().container_width, 640.0);
    }
}
