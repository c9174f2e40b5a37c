use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn user(name: &str) -> Identity {
    Identity { user_id: Uuid::new_v4(), email: format!("{name}@x.com"), name: name.into() }
}

#[test]
fn register_is_idempotent_per_connection() {
    let mut reg = PresenceRegistry::new();
    let alice = user("alice");
    let conn = Uuid::new_v4();
    reg.register(conn, alice.clone());
    reg.register(conn, alice.clone());
    assert_eq!(reg.connections_of(alice.user_id), vec![conn]);
    assert_eq!(reg.stats().total_connected_users, 1);
}

#[test]
fn join_counts_distinct_users_not_connections() {
    let mut reg = PresenceRegistry::new();
    let alice = user("alice");
    let project = Uuid::new_v4();
    let tab1 = Uuid::new_v4();
    let tab2 = Uuid::new_v4();
    reg.register(tab1, alice.clone());
    reg.register(tab2, alice.clone());

    assert_eq!(reg.join_project(tab1, project), Ok(1));
    assert_eq!(reg.join_project(tab2, project), Ok(1));
    assert_eq!(reg.online_users(project), HashSet::from([alice.user_id]));
}

#[test]
fn join_with_unregistered_connection_fails() {
    let mut reg = PresenceRegistry::new();
    let conn = Uuid::new_v4();
    assert_eq!(reg.join_project(conn, Uuid::new_v4()), Err(PresenceError::UnknownConnection(conn)));
}

#[test]
fn two_tabs_stay_online_until_both_leave() {
    let mut reg = PresenceRegistry::new();
    let alice = user("alice");
    let project = Uuid::new_v4();
    let tab1 = Uuid::new_v4();
    let tab2 = Uuid::new_v4();
    reg.register(tab1, alice.clone());
    reg.register(tab2, alice.clone());
    reg.join_project(tab1, project).unwrap();
    reg.join_project(tab2, project).unwrap();

    assert_eq!(reg.leave_project(tab1, project), None);
    assert_eq!(reg.online_count(project), 1);
    assert_eq!(reg.leave_project(tab2, project), Some(0));
    assert_eq!(reg.online_count(project), 0);
    assert_eq!(reg.stats().total_active_project_rooms, 0);
}

#[test]
fn leave_of_unjoined_project_is_noop() {
    let mut reg = PresenceRegistry::new();
    let conn = Uuid::new_v4();
    reg.register(conn, user("bob"));
    assert_eq!(reg.leave_project(conn, Uuid::new_v4()), None);
}

#[test]
fn closing_both_tabs_reports_offline_once() {
    let mut reg = PresenceRegistry::new();
    let alice = user("alice");
    let project = Uuid::new_v4();
    let tab1 = Uuid::new_v4();
    let tab2 = Uuid::new_v4();
    reg.register(tab1, alice.clone());
    reg.register(tab2, alice.clone());
    reg.join_project(tab1, project).unwrap();
    reg.join_project(tab2, project).unwrap();

    let first = reg.unregister(tab1).unwrap();
    assert!(first.offline_projects.is_empty());
    let second = reg.unregister(tab2).unwrap();
    assert_eq!(second.offline_projects, vec![(project, 0)]);
    assert_eq!(second.identity, alice);

    assert_eq!(reg.stats(), PresenceStats { total_connected_users: 0, total_active_project_rooms: 0 });
    assert!(reg.unregister(tab2).is_none());
}

#[test]
fn unregister_reports_every_project_the_user_left() {
    let mut reg = PresenceRegistry::new();
    let alice = user("alice");
    let bob = user("bob");
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    reg.register(a, alice.clone());
    reg.register(b, bob.clone());
    reg.join_project(a, p1).unwrap();
    reg.join_project(a, p2).unwrap();
    reg.join_project(b, p2).unwrap();

    let departure = reg.unregister(a).unwrap();
    let mut left = departure.offline_projects.clone();
    left.sort_unstable();
    let mut expected = vec![(p1, 0), (p2, 1)];
    expected.sort_unstable();
    assert_eq!(left, expected);
    assert_eq!(reg.online_users(p2), HashSet::from([bob.user_id]));
}

#[test]
fn online_count_is_bounded_under_random_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut reg = PresenceRegistry::new();
    let users: Vec<Identity> = (0..4).map(|i| user(&format!("u{i}"))).collect();
    let projects: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let mut live: Vec<Uuid> = Vec::new();

    for _ in 0..2_000 {
        match rng.random_range(0..4) {
            0 => {
                let conn = Uuid::new_v4();
                reg.register(conn, users[rng.random_range(0..users.len())].clone());
                live.push(conn);
            }
            1 if !live.is_empty() => {
                let conn = live.swap_remove(rng.random_range(0..live.len()));
                reg.unregister(conn);
            }
            2 if !live.is_empty() => {
                let conn = live[rng.random_range(0..live.len())];
                reg.join_project(conn, projects[rng.random_range(0..projects.len())]).unwrap();
            }
            3 if !live.is_empty() => {
                let conn = live[rng.random_range(0..live.len())];
                reg.leave_project(conn, projects[rng.random_range(0..projects.len())]);
            }
            _ => {}
        }

        let connected = reg.stats().total_connected_users;
        for &project in &projects {
            let expected: HashSet<Uuid> = live
                .iter()
                .filter(|c| reg.has_joined(**c, project))
                .filter_map(|c| reg.identity(*c).map(|i| i.user_id))
                .collect();
            assert_eq!(reg.online_users(project), expected);
            assert!(reg.online_count(project) <= connected);
        }
    }
}
