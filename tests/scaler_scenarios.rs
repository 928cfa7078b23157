//! Preview scaling against container widths

use rfexport::scaler::scale_factor;
use rfexport::{LayoutScaler, ViewportContext, ViewportObserver};
use std::time::Duration;

#[test]
fn wide_container_keeps_natural_size() {
    let mut s = LayoutScaler::default();
    let t = s.mount(ViewportContext { container_width: 1000.0, dpr: 2.0 });
    assert_eq!(t.factor, 1.0);
    assert_eq!(t.css(), "scale(1)");
    assert_eq!(t.displayed_width(), 850.0);
}

#[test]
fn narrow_container_shrinks_preview() {
    let mut s = LayoutScaler::default();
    let t = s.on_resize(400.0);
    assert!((t.factor - 0.4329).abs() < 1e-4);
    assert_eq!(t.origin(), "top center");
}

#[test]
fn factor_stays_in_unit_interval() {
    let mut w = 0.0f32;
    while w <= 4000.0 {
        let f = scale_factor(w, 32.0, 850.0);
        assert!(!f.is_nan());
        assert!((0.0..=1.0).contains(&f), "width {} gave {}", w, f);
        w += 7.5;
    }
    assert_eq!(scale_factor(10.0, 32.0, 850.0), 0.0);
    assert_eq!(scale_factor(f32::NAN, 32.0, 850.0), 0.0);
}

#[tokio::test]
async fn tracked_scale_follows_every_resize() {
    let observer = ViewportObserver::new(ViewportContext { container_width: 1000.0, dpr: 1.0 });
    let (mut rx, _task) = LayoutScaler::default().track(&observer);
    assert_eq!(rx.borrow().factor, 1.0);

    for (width, expected) in [(400.0, 368.0 / 850.0), (882.0, 1.0), (32.0, 0.0)] {
        observer.resize(width);
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        let f = rx.borrow_and_update().factor;
        assert!((f - expected).abs() < 1e-5, "width {} gave {}", width, f);
    }
}
