//! Role exclusivity across arbitrary sequences of role-affecting changes

mod common;

use common::{Bridge, FRAMED};
use proptest::prelude::*;
use wlbridge::geometry::Rect;
use wlbridge::protocol::ConfigFlags;
use wlbridge::surface::RoleKind;
use wlbridge::window::{WindowHandle, WindowRects, WindowStyle};

const PARENT: WindowHandle = WindowHandle(1);
const CHILD: WindowHandle = WindowHandle(2);

#[derive(Debug, Clone, Copy)]
enum Change {
    ToggleParentVisible,
    ToggleChildVisible,
    ToggleOwner,
    MoveChild(i32, i32),
    ServerMaximize,
}

fn change() -> impl Strategy<Value = Change> {
    prop_oneof![
        Just(Change::ToggleParentVisible),
        Just(Change::ToggleChildVisible),
        Just(Change::ToggleOwner),
        (-50i32..50, -50i32..50).prop_map(|(x, y)| Change::MoveChild(x, y)),
        Just(Change::ServerMaximize),
    ]
}

fn style(visible: bool) -> WindowStyle {
    if visible {
        FRAMED
    } else {
        FRAMED - WindowStyle::VISIBLE
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_exactly_one_role_follows_inputs(changes in prop::collection::vec(change(), 1..16)) {
        let bridge = Bridge::new();
        let parent_rects = WindowRects::plain(Rect::new(0, 0, 800, 600));
        let mut child_rect = Rect::new(100, 100, 300, 200);
        let mut parent_visible = true;
        let mut child_visible = true;
        let mut owned = false;

        bridge.manager.on_window_pos_changed(PARENT, parent_rects, style(true)).unwrap();
        bridge.manager.on_window_pos_changed(CHILD, WindowRects::plain(child_rect), style(true)).unwrap();
        let first = bridge.manager.surface(CHILD).unwrap();
        let mut previous = (first.id(), first.role_kind());
        drop(first);

        for change in changes {
            match change {
                Change::ToggleParentVisible => {
                    parent_visible = !parent_visible;
                    bridge.manager.on_window_pos_changed(PARENT, parent_rects, style(parent_visible)).unwrap();
                }
                Change::ToggleChildVisible => {
                    child_visible = !child_visible;
                    bridge.manager.on_window_pos_changed(CHILD, WindowRects::plain(child_rect), style(child_visible)).unwrap();
                }
                Change::ToggleOwner => {
                    owned = !owned;
                    bridge.host.set_owner(CHILD, owned.then_some(PARENT));
                    bridge.manager.on_window_pos_changed(CHILD, WindowRects::plain(child_rect), style(child_visible)).unwrap();
                }
                Change::MoveChild(dx, dy) => {
                    child_rect = child_rect.translate(dx, dy);
                    bridge.manager.on_window_pos_changed(CHILD, WindowRects::plain(child_rect), style(child_visible)).unwrap();
                }
                Change::ServerMaximize => {
                    if bridge.manager.surface(CHILD).unwrap().role_kind() == RoleKind::TopLevel {
                        bridge.configure(CHILD, 1, 0, 0, ConfigFlags::MAXIMIZED);
                    }
                }
            }
            // Children follow their parent through queued refreshes
            bridge.manager.dispatch(Some(std::time::Duration::ZERO)).unwrap();

            let surface = bridge.manager.surface(CHILD).unwrap();
            let expected = if owned && parent_visible {
                RoleKind::SubSurface
            } else if child_visible {
                RoleKind::TopLevel
            } else {
                RoleKind::None
            };
            prop_assert_eq!(surface.role_kind(), expected);

            let now = (surface.id(), surface.role_kind());
            if now != previous {
                prop_assert!(surface.states().is_empty());
                prop_assert!(surface.current().is_none());
            }
            previous = now;
        }
    }
}
