use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{Value, json};

use mattersync_engine::graph::{Channel, Post, User};
use mattersync_engine::{
    Chunk, ConnectionState, Engine, Frame, HttpRequest, HttpTransport, Method, RequestId,
    ServerConfig, Settings, StreamConnector, StreamError, StreamLink, SyncError, ViewSink, WorkerId,
};

// -- Fakes --

type Issued = Rc<RefCell<Vec<(RequestId, HttpRequest)>>>;

struct FakeTransport(Issued);

impl HttpTransport for FakeTransport {
    fn dispatch(&mut self, id: RequestId, request: &HttpRequest) {
        self.0.borrow_mut().push((id, request.clone()));
    }
}

#[derive(Default)]
struct Wire {
    sent: Vec<String>,
    inbox: VecDeque<Frame>,
    closed: bool,
}

struct FakeLink(Rc<RefCell<Wire>>);

impl StreamLink for FakeLink {
    fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.0.borrow_mut().sent.push(text);
        Ok(())
    }

    fn send_ping(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Frame>, StreamError> {
        Ok(self.0.borrow_mut().inbox.pop_front())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

type Wires = Rc<RefCell<Vec<(WorkerId, Rc<RefCell<Wire>>)>>>;

struct FakeConnector(Wires);

impl StreamConnector for FakeConnector {
    fn open(&mut self, _: &str, worker_id: WorkerId, _: &str) -> Result<Box<dyn StreamLink>, StreamError> {
        let wire = Rc::new(RefCell::new(Wire::default()));
        self.0.borrow_mut().push((worker_id, wire.clone()));
        Ok(Box::new(FakeLink(wire)))
    }
}

#[derive(Default)]
struct Recorder {
    log: Vec<String>,
}

impl Recorder {
    fn count(&self, entry: &str) -> usize {
        self.log.iter().filter(|e| *e == entry).count()
    }

    fn has(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }
}

impl ViewSink for Recorder {
    fn write_post(&mut self, _: &str, channel: &Channel, post: &Post, parent: Option<&Post>) {
        let parent = parent.map(|p| p.id.as_str()).unwrap_or("-");
        self.log.push(format!("write {} {} {}", channel.id, post.id, parent));
    }

    fn edit_post(&mut self, _: &str, channel: &Channel, post: &Post) {
        self.log.push(format!("edit {} {}", channel.id, post.id));
    }

    fn delete_post(&mut self, _: &str, channel: &Channel, post_id: &str) {
        self.log.push(format!("delete {} {}", channel.id, post_id));
    }

    fn set_channel_properties(&mut self, _: &str, channel: &Channel, title: &str) {
        self.log.push(format!("props {} {}", channel.id, title));
    }

    fn add_reaction(&mut self, _: &str, _: &Channel, post: &Post, user_id: &str, emoji: &str) {
        self.log.push(format!("react {} {} {}", post.id, user_id, emoji));
    }

    fn remove_reaction(&mut self, _: &str, _: &Channel, post: &Post, user_id: &str, emoji: &str) {
        self.log.push(format!("unreact {} {} {}", post.id, user_id, emoji));
    }

    fn set_channel_loading(&mut self, _: &str, channel: &Channel, loading: bool) {
        self.log.push(format!("loading {} {}", channel.id, loading));
    }

    fn add_user(&mut self, _: &str, channel: &Channel, user: &User) {
        self.log.push(format!("join {} {}", channel.id, user.id));
    }

    fn remove_user(&mut self, _: &str, channel: &Channel, user_id: &str) {
        self.log.push(format!("leave {} {}", channel.id, user_id));
    }

    fn server_status(&mut self, server_id: &str, state: ConnectionState) {
        self.log.push(format!("status {} {}", server_id, state));
    }

    fn action_failed(&mut self, _: &str, message: &str) {
        self.log.push(format!("failed {}", message));
    }

    fn presence_changed(&mut self, _: &str, user: &User) {
        let status = user.status.as_deref().unwrap_or("-");
        self.log.push(format!("presence {} {}", user.id, status));
    }

    fn close_channel(&mut self, _: &str, channel_id: &str) {
        self.log.push(format!("close {}", channel_id));
    }
}

// -- Harness --

struct Harness {
    engine: Engine<Recorder>,
    issued: Issued,
    wires: Wires,
    answered: usize,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(|_| {})
    }

    fn with_settings(tune: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::default();
        settings.servers.insert(
            "work".into(),
            ServerConfig {
                id: "work".into(),
                url: "https://chat.example.com/".into(),
                username: "ana".into(),
                password: "secret".into(),
                command_2fa: None,
            },
        );
        settings.servers.insert(
            "broken".into(),
            ServerConfig {
                id: "broken".into(),
                url: "https://other.example.com".into(),
                username: "ana".into(),
                ..Default::default()
            },
        );
        tune(&mut settings);
        let issued = Issued::default();
        let wires = Wires::default();
        let engine = Engine::new(
            &settings,
            Box::new(FakeTransport(issued.clone())),
            Box::new(FakeConnector(wires.clone())),
            Recorder::default(),
        );
        Self {
            engine,
            issued,
            wires,
            answered: 0,
            now: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.engine.tick(self.now);
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        self.tick();
    }

    fn in_flight(&mut self) -> (RequestId, HttpRequest) {
        self.tick();
        let issued = self.issued.borrow();
        assert!(issued.len() > self.answered, "no request was issued");
        issued[self.answered].clone()
    }

    fn reply(&mut self, status: u16, token: Option<&str>, body: &str) -> HttpRequest {
        let (id, request) = self.in_flight();
        self.answered += 1;
        let head = Chunk::Head {
            status,
            token: token.map(str::to_string),
        };
        self.engine.on_response(id, head, false, self.now);
        self.engine
            .on_response(id, Chunk::Body(Bytes::from(body.to_string())), true, self.now);
        request
    }

    /// Answers the in-flight request with 200 after checking its path.
    fn serve(&mut self, path: &str, body: &str) -> HttpRequest {
        let request = self.reply(200, None, body);
        assert_eq!(request.path(), path);
        request
    }

    fn idle(&mut self) -> bool {
        self.tick();
        self.issued.borrow().len() == self.answered
    }

    fn worker(&self, n: usize) -> (WorkerId, Rc<RefCell<Wire>>) {
        self.wires.borrow()[n].clone()
    }

    fn push(&mut self, frame: Frame) {
        let count = self.wires.borrow().len();
        let (id, wire) = self.worker(count - 1);
        wire.borrow_mut().inbox.push_back(frame);
        self.engine.on_readable("work", id, self.now);
    }

    fn view(&self) -> &Recorder {
        self.engine.view()
    }

    fn login(&mut self) {
        self.engine.connect("work").unwrap();
        let request = self.reply(200, Some("tok"), r#"{"id": "me", "username": "ana"}"#);
        assert_eq!(request.path(), "/users/login");
        assert_eq!(request.method, Method::Post);
        assert!(request.bearer.is_none());
    }

    /// Logs in and walks the whole backfill of one team with channel `c1`
    /// holding `p1` as its only unread post.
    fn hydrate(&mut self) {
        self.login();
        self.serve("/users?page=0&per_page=60", &users(&["bob", "eve"]));
        self.serve("/users/me/preferences", "[]");
        self.serve(
            "/users/me/teams",
            r#"[{"id": "t1", "name": "team", "display_name": "Team"}]"#,
        );
        self.serve(
            "/users/me/teams/t1/channels",
            r#"[
                {"id": "c1", "type": "O", "name": "town", "display_name": "Town", "team_id": "t1", "last_post_at": 1000},
                {"id": "d0", "type": "D", "name": "me__eve", "team_id": "", "last_post_at": 0}
            ]"#,
        );
        self.serve(
            "/users/me/channels/c1/posts/unread?limit_after=1",
            &page(&[post("p1", "c1", 1000, "hello")], ""),
        );
        self.serve(
            "/channels/c1/members?page=0&per_page=200",
            r#"[{"channel_id": "c1", "user_id": "me"}, {"channel_id": "c1", "user_id": "bob"}]"#,
        );
        self.serve(
            "/users/me/channel_members?page=0&pageSize=100",
            r#"[{"channel_id": "c1", "user_id": "me", "notify_props": {"mark_unread": "all"}}]"#,
        );
        self.push(Frame::Opened);
        assert!(self.idle());
    }

    fn post_ids(&self, channel_id: &str) -> Vec<String> {
        let server = self.engine.server("work").unwrap();
        server
            .channel(channel_id)
            .unwrap()
            .posts_in_order()
            .map(|p| p.id.clone())
            .collect()
    }
}

fn users(ids: &[&str]) -> String {
    let list: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "username": format!("user-{}", id)}))
        .collect();
    Value::Array(list).to_string()
}

fn post(id: &str, channel_id: &str, at: i64, message: &str) -> Value {
    json!({
        "id": id,
        "channel_id": channel_id,
        "create_at": at,
        "user_id": "bob",
        "message": message,
    })
}

/// A post page as the server sends it: `order` newest first.
fn page(posts: &[Value], next_post_id: &str) -> String {
    let order: Vec<Value> = posts.iter().rev().map(|p| p["id"].clone()).collect();
    let map: serde_json::Map<String, Value> = posts
        .iter()
        .map(|p| (p["id"].as_str().unwrap_or_default().to_string(), p.clone()))
        .collect();
    json!({"order": order, "posts": map, "next_post_id": next_post_id, "prev_post_id": ""}).to_string()
}

fn posted(post: &Value) -> Frame {
    Frame::Text(
        json!({
            "event": "posted",
            "data": {"post": post.to_string(), "team_id": "t1"},
            "broadcast": {"channel_id": post["channel_id"]},
        })
        .to_string(),
    )
}

fn edited(post: &Value) -> Frame {
    Frame::Text(
        json!({
            "event": "post_edited",
            "data": {"post": post.to_string()},
            "broadcast": {"channel_id": post["channel_id"]},
        })
        .to_string(),
    )
}

// -- Scenarios --

#[test]
fn full_user_pages_request_the_next_page() {
    let mut h = Harness::new();
    h.login();

    let first: Vec<String> = (0..60).map(|i| format!("u{}", i)).collect();
    let first: Vec<&str> = first.iter().map(String::as_str).collect();
    let request = h.serve("/users?page=0&per_page=60", &users(&first));
    assert_eq!(request.bearer.as_deref(), Some("tok"));

    h.serve("/users?page=1&per_page=60", &users(&["x", "y", "z"]));
    h.serve("/users/me/preferences", "[]");

    let server = h.engine.server("work").unwrap();
    assert_eq!(server.users.len(), 64);
}

#[test]
fn backfill_builds_the_graph() {
    let mut h = Harness::new();
    h.hydrate();

    let server = h.engine.server("work").unwrap();
    assert_eq!(server.state, ConnectionState::Open);
    assert!(server.channel("d0").is_none());
    let channel = server.channel("c1").unwrap();
    assert!(!channel.loading);
    assert!(!channel.muted);
    assert!(!channel.has_unread());
    assert!(channel.posts["p1"].read);
    assert_eq!(channel.members.len(), 2);

    let view = h.view();
    assert!(view.has("props c1 Town"));
    assert!(view.has("write c1 p1 -"));
    assert!(view.has("join c1 bob"));
    assert!(view.has("loading c1 false"));
    assert!(view.has("status work open"));

    let (_, wire) = h.worker(0);
    let challenge: Value = serde_json::from_str(&wire.borrow().sent[0]).unwrap();
    assert_eq!(challenge["data"]["token"], "tok");
}

#[test]
fn live_posts_thread_under_known_roots() {
    let mut h = Harness::new();
    h.hydrate();

    let mut reply = post("p2", "c1", 2000, "re");
    reply["root_id"] = json!("p1");
    h.push(posted(&reply));

    assert!(h.view().has("write c1 p2 p1"));
    assert_eq!(h.post_ids("c1"), vec!["p1", "p2"]);
    let server = h.engine.server("work").unwrap();
    assert!(server.channel("c1").unwrap().unread);
}

#[test]
fn repeated_edit_leaves_the_same_post() {
    let mut h = Harness::new();
    h.hydrate();

    let mut changed = post("p1", "c1", 1000, "hello again");
    changed["edit_at"] = json!(1500);
    h.push(edited(&changed));
    let once = h.engine.server("work").unwrap().channel("c1").unwrap().posts["p1"].clone();
    h.push(edited(&changed));
    let twice = &h.engine.server("work").unwrap().channel("c1").unwrap().posts["p1"];

    assert_eq!(&once, twice);
    assert_eq!(twice.message, "hello again");
    assert!(twice.edited);
    assert_eq!(h.post_ids("c1"), vec!["p1"]);
}

#[test]
fn post_dropped_while_loading_is_caught_up() {
    let mut h = Harness::new();
    h.login();
    h.serve("/users?page=0&per_page=60", &users(&["bob"]));
    h.serve("/users/me/preferences", "[]");
    h.serve("/users/me/teams", r#"[{"id": "t1", "name": "team"}]"#);
    h.serve(
        "/users/me/teams/t1/channels",
        r#"[{"id": "c1", "type": "O", "name": "town", "team_id": "t1", "last_post_at": 1000}]"#,
    );
    h.push(Frame::Opened);

    // Arrives while the unread window is still being fetched.
    h.push(posted(&post("p2", "c1", 2000, "late")));
    assert!(!h.view().has("write c1 p2 -"));

    h.serve(
        "/users/me/channels/c1/posts/unread?limit_after=1",
        &page(&[post("p1", "c1", 1000, "hello")], ""),
    );
    h.serve("/channels/c1/members?page=0&per_page=200", "[]");
    h.serve("/users/me/channel_members?page=0&pageSize=100", "[]");
    h.serve(
        "/channels/c1/posts?after=p1",
        &page(&[post("p2", "c1", 2000, "late")], ""),
    );

    assert_eq!(h.post_ids("c1"), vec!["p1", "p2"]);
    let server = h.engine.server("work").unwrap();
    assert!(!server.channel("c1").unwrap().loading);
    assert!(h.idle());
}

#[test]
fn reconnect_resyncs_from_the_last_post() {
    let mut h = Harness::new();
    h.hydrate();
    let (old_id, old_wire) = h.worker(0);

    h.push(Frame::Closed(Some("gone".into())));
    assert!(old_wire.borrow().closed);
    assert!(h.view().has("status work reconnecting"));

    h.advance(Duration::from_secs(4));
    assert_eq!(h.wires.borrow().len(), 1);
    h.advance(Duration::from_secs(1));
    assert_eq!(h.wires.borrow().len(), 2);

    // Readiness of the retired stream is ignored.
    old_wire.borrow_mut().inbox.push_back(Frame::Opened);
    h.engine.on_readable("work", old_id, h.now);
    assert_eq!(h.engine.server("work").unwrap().state, ConnectionState::Connecting);

    h.push(Frame::Opened);
    assert_eq!(h.engine.server("work").unwrap().state, ConnectionState::Open);
    h.serve(
        "/channels/c1/posts?after=p1",
        &page(
            &[post("p2", "c1", 2000, "missed"), post("p3", "c1", 3000, "missed too")],
            "",
        ),
    );

    assert_eq!(h.post_ids("c1"), vec!["p1", "p2", "p3"]);
    assert!(!h.engine.server("work").unwrap().channel("c1").unwrap().loading);
}

#[test]
fn rejected_login_removes_the_server() {
    let mut h = Harness::new();
    h.engine.connect("work").unwrap();
    h.reply(401, None, r#"{"message": "invalid credentials"}"#);

    assert!(h.engine.server("work").is_none());
    assert!(h.engine.connected_servers().is_empty());
    let view = h.view();
    assert!(view.log.iter().any(|e| e.starts_with("failed authentication failed")));
    assert!(view.has("status work disconnected"));
    assert!(h.wires.borrow().is_empty());
}

#[test]
fn incomplete_configuration_never_reaches_the_network() {
    let mut h = Harness::new();
    assert!(matches!(h.engine.connect("broken"), Err(SyncError::Configuration(_))));
    assert!(matches!(h.engine.connect("nope"), Err(SyncError::UnknownServer(_))));
    assert!(h.idle());
    assert!(h.issued.borrow().is_empty());
}

#[test]
fn second_connect_is_refused() {
    let mut h = Harness::new();
    h.engine.connect("work").unwrap();
    assert!(matches!(h.engine.connect("work"), Err(SyncError::AlreadyConnected(_))));
}

#[test]
fn responses_of_a_previous_session_are_ignored() {
    let mut h = Harness::new();
    h.engine.connect("work").unwrap();
    let (stale, _) = h.in_flight();

    h.engine.complete_disconnect("work", Ok(()));
    h.engine.connect("work").unwrap();

    h.answered += 1;
    h.engine.on_response(stale, Chunk::Head { status: 200, token: Some("old".into()) }, false, h.now);
    h.engine
        .on_response(stale, Chunk::Body(Bytes::from_static(br#"{"id": "me", "username": "ana"}"#)), true, h.now);
    assert!(h.engine.server("work").unwrap().token.is_none());
    assert!(h.wires.borrow().is_empty());

    let request = h.reply(200, Some("new"), r#"{"id": "me", "username": "ana"}"#);
    assert_eq!(request.path(), "/users/login");
    assert_eq!(h.engine.server("work").unwrap().token.as_deref(), Some("new"));
}

#[test]
fn user_actions_validate_locally() {
    let mut h = Harness::new();
    assert!(matches!(h.engine.send_post("work", "c1", "hi", None, h.now), Err(SyncError::UnknownServer(_))));
    h.hydrate();

    assert!(matches!(h.engine.send_post("work", "nope", "hi", None, h.now), Err(SyncError::UnknownChannel(_))));
    assert!(matches!(h.engine.react("work", "nope", "+1", h.now), Err(SyncError::UnknownPost(_))));

    h.engine.send_post("work", "c1", "hi", Some("p1"), h.now).unwrap();
    let request = h.serve("/posts", r#"{"id": "p9"}"#);
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["message"], "hi");
    assert_eq!(body["root_id"], "p1");

    h.engine.react("work", "p1", ":+1:", h.now).unwrap();
    let request = h.serve("/reactions", "{}");
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["emoji_name"], "+1");
    assert_eq!(body["user_id"], "me");

    h.engine.execute_command("work", "c1", "away", h.now).unwrap();
    let request = h.reply(500, None, "boom");
    assert_eq!(request.path(), "/commands/execute");
    assert!(h.view().log.iter().any(|e| e.starts_with("failed could not run the command")));
}

#[test]
fn focused_channel_is_marked_read_as_posts_arrive() {
    let mut h = Harness::new();
    h.hydrate();
    h.engine.focus_channel("work", "c1", h.now).unwrap();
    // Nothing new since the unread window.
    h.serve("/users/status/ids", "[]");
    assert!(h.idle());

    h.push(posted(&post("p2", "c1", 2000, "ping")));
    h.serve("/channels/members/me/view", r#"{"status": "OK"}"#);

    let server = h.engine.server("work").unwrap();
    let channel = server.channel("c1").unwrap();
    assert!(!channel.unread);
    assert_eq!(channel.last_read_cursor.as_ref().map(|c| c.post_id.as_str()), Some("p2"));
}

#[test]
fn disconnect_closes_every_channel() {
    let mut h = Harness::new();
    h.hydrate();

    let logout = h.engine.logout_request("work").unwrap();
    assert_eq!(logout.path(), "/users/logout");
    assert_eq!(logout.bearer.as_deref(), Some("tok"));
    h.engine.complete_disconnect("work", Ok(()));

    assert!(h.view().has("close c1"));
    assert!(h.view().has("status work disconnected"));
    assert!(h.worker(0).1.borrow().closed);
    assert!(matches!(h.engine.logout_request("work"), Err(SyncError::UnknownServer(_))));
}

fn event(name: &str, data: Value, channel_id: &str) -> Frame {
    Frame::Text(json!({"event": name, "data": data, "broadcast": {"channel_id": channel_id}}).to_string())
}

fn reaction(name: &str, emoji: &str) -> Frame {
    let reaction = json!({"user_id": "bob", "post_id": "p1", "emoji_name": emoji});
    event(name, json!({"reaction": reaction.to_string()}), "c1")
}

#[test]
fn duplicate_reactions_are_applied_once() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(reaction("reaction_added", "smile"));
    h.push(reaction("reaction_added", "smile"));
    assert_eq!(h.view().count("react p1 bob smile"), 1);

    h.push(reaction("reaction_removed", "smile"));
    assert!(h.view().has("unreact p1 bob smile"));
    let server = h.engine.server("work").unwrap();
    assert!(server.channel("c1").unwrap().posts["p1"].reactions.is_empty());
}

#[test]
fn deleted_posts_stay_deleted() {
    let mut h = Harness::new();
    h.hydrate();

    let p1 = post("p1", "c1", 1000, "hello");
    h.push(event("post_deleted", json!({"post": p1.to_string()}), "c1"));
    h.push(posted(&p1));

    assert!(h.view().has("delete c1 p1"));
    assert_eq!(h.view().count("write c1 p1 -"), 1);
    let server = h.engine.server("work").unwrap();
    let post = &server.channel("c1").unwrap().posts["p1"];
    assert!(post.deleted);
    assert!(post.message.is_empty());
}

#[test]
fn posts_of_unknown_teams_are_ignored() {
    let mut h = Harness::new();
    h.hydrate();

    let stray = post("p7", "c1", 7000, "elsewhere");
    h.push(event("posted", json!({"post": stray.to_string(), "team_id": "t9"}), "c1"));
    assert_eq!(h.post_ids("c1"), vec!["p1"]);
}

#[test]
fn channel_viewed_elsewhere_clears_unread() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(posted(&post("p2", "c1", 2000, "new")));
    assert!(h.engine.server("work").unwrap().channel("c1").unwrap().has_unread());

    h.push(event("channel_viewed", json!({"channel_id": "c1"}), ""));
    let channel = h.engine.server("work").unwrap().channel("c1").unwrap();
    assert!(!channel.unread);
    assert!(!channel.has_unread());
}

#[test]
fn membership_events_update_rosters_and_channels() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("user_added", json!({"user_id": "eve"}), "c1"));
    assert!(h.view().has("join c1 eve"));

    h.push(event("user_removed", json!({"user_id": "bob"}), "c1"));
    assert!(h.view().has("leave c1 bob"));

    h.push(event("user_removed", json!({"channel_id": "c1", "user_id": "me"}), ""));
    assert!(h.view().has("close c1"));
    assert!(h.engine.server("work").unwrap().channel("c1").is_none());
}

#[test]
fn leaving_a_team_closes_its_channels() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("leave_team", json!({"team_id": "t1", "user_id": "me"}), ""));
    assert!(h.view().has("close c1"));
    assert!(h.engine.server("work").unwrap().teams.is_empty());
}

#[test]
fn created_channels_are_fetched_and_loaded() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("channel_created", json!({"channel_id": "c2", "team_id": "t1"}), ""));
    h.serve(
        "/channels/c2",
        r#"{"id": "c2", "type": "P", "name": "ops", "display_name": "Ops", "team_id": "t1", "last_post_at": 0}"#,
    );
    h.serve("/users/me/channels/c2/posts/unread?limit_after=1", &page(&[], ""));
    h.serve("/channels/c2/members?page=0&per_page=200", "[]");

    assert!(h.view().has("props c2 Ops"));
    assert!(h.view().has("loading c2 false"));
    assert!(h.engine.server("work").unwrap().channel("c2").unwrap().posts.is_empty());
    assert!(h.idle());
}

#[test]
fn failing_post_page_is_retried_then_given_up() {
    let mut h = Harness::new();
    h.login();
    h.serve("/users?page=0&per_page=60", &users(&["bob"]));
    h.serve("/users/me/preferences", "[]");
    h.serve("/users/me/teams", r#"[{"id": "t1", "name": "team"}]"#);
    h.serve(
        "/users/me/teams/t1/channels",
        r#"[{"id": "c1", "type": "O", "name": "town", "team_id": "t1", "last_post_at": 1000}]"#,
    );

    let unread = "/users/me/channels/c1/posts/unread?limit_after=1";
    assert_eq!(h.reply(502, None, "bad gateway").path(), unread);
    h.serve("/channels/c1/members?page=0&per_page=200", "[]");
    h.serve("/users/me/channel_members?page=0&pageSize=100", "[]");
    assert_eq!(h.reply(502, None, "bad gateway").path(), unread);
    assert!(h.engine.server("work").unwrap().channel("c1").unwrap().loading);
    assert_eq!(h.reply(502, None, "bad gateway").path(), unread);

    assert!(!h.engine.server("work").unwrap().channel("c1").unwrap().loading);
    assert!(h.view().log.iter().any(|e| e.starts_with("failed could not load posts of channel c1")));
    assert!(h.idle());
}

#[test]
fn mute_follows_membership_updates() {
    let mut h = Harness::new();
    h.hydrate();

    let member = json!({"channel_id": "c1", "user_id": "me", "notify_props": {"mark_unread": "mention"}});
    h.push(event("channel_member_updated", json!({"channelMember": member.to_string()}), ""));
    assert!(h.engine.server("work").unwrap().channel("c1").unwrap().muted);
    assert_eq!(h.view().count("props c1 Town"), 2);
}

#[test]
fn direct_channel_announced_by_an_event_opens_even_without_posts() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("direct_added", json!({"teammate_id": "bob"}), "d5"));
    h.serve(
        "/channels/d5",
        r#"{"id": "d5", "type": "D", "name": "me__bob", "team_id": "", "last_post_at": 0}"#,
    );
    h.serve("/users/me/channels/d5/posts/unread?limit_after=1", &page(&[], ""));
    h.serve("/channels/d5/members?page=0&per_page=200", "[]");
    assert!(h.view().has("props d5 user-bob"));
    assert!(h.view().has("loading d5 false"));

    let first = post("p9", "d5", 9000, "hi there");
    h.push(event("posted", json!({"post": first.to_string(), "team_id": ""}), "d5"));
    assert!(h.view().has("write d5 p9 -"));
    assert_eq!(h.post_ids("d5"), vec!["p9"]);
    assert!(h.idle());
}

#[test]
fn joining_a_team_loads_its_channels() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("added_to_team", json!({"team_id": "t2", "user_id": "me"}), ""));
    h.serve("/teams/t2", r#"{"id": "t2", "name": "ops", "display_name": "Ops"}"#);
    h.serve(
        "/users/me/teams/t2/channels",
        r#"[{"id": "c7", "type": "O", "name": "alerts", "display_name": "Alerts", "team_id": "t2", "last_post_at": 700}]"#,
    );
    h.serve("/users/me/channels/c7/posts/unread?limit_after=1", &page(&[], ""));
    h.serve("/channels/c7/members?page=0&per_page=200", "[]");
    h.serve("/users/me/channel_members?page=0&pageSize=100", "[]");

    let server = h.engine.server("work").unwrap();
    assert!(server.teams.contains_key("t2"));
    assert!(server.channel("c7").is_some());
    assert!(h.view().has("props c7 Alerts"));

    // Someone else joining is not our business.
    h.push(event("added_to_team", json!({"team_id": "t3", "user_id": "bob"}), ""));
    assert!(h.idle());
}

#[test]
fn presence_renames_and_new_users_are_applied() {
    let mut h = Harness::new();
    h.hydrate();

    h.push(event("status_change", json!({"user_id": "bob", "status": "away"}), ""));
    h.push(event("status_change", json!({"user_id": "bob", "status": "away"}), ""));
    assert_eq!(h.view().count("presence bob away"), 1);
    let server = h.engine.server("work").unwrap();
    assert_eq!(server.users["bob"].status.as_deref(), Some("away"));

    let renamed = json!({"id": "c1", "type": "O", "name": "town", "display_name": "Plaza", "team_id": "t1"});
    h.push(event("channel_updated", json!({"channel": renamed.to_string()}), "c1"));
    assert!(h.view().has("props c1 Plaza"));

    h.push(event("new_user", json!({"user_id": "zed"}), ""));
    h.serve("/users/zed", r#"{"id": "zed", "username": "zed"}"#);
    assert_eq!(h.engine.server("work").unwrap().users["zed"].username, "zed");
}

#[test]
fn unanswered_ping_reconnects_through_the_timer() {
    let mut h = Harness::new();
    h.hydrate();

    // First beat pings, the second finds it unanswered.
    h.advance(Duration::from_secs(5));
    assert_eq!(h.engine.server("work").unwrap().state, ConnectionState::Open);
    h.advance(Duration::from_secs(5));
    assert!(h.view().has("status work reconnecting"));
    assert!(h.worker(0).1.borrow().closed);

    h.advance(Duration::from_secs(5));
    assert_eq!(h.wires.borrow().len(), 2);
    h.push(Frame::Opened);
    h.serve("/channels/c1/posts?after=p1", &page(&[], ""));
    assert_eq!(h.engine.server("work").unwrap().state, ConnectionState::Open);
    assert!(h.idle());
}

#[test]
fn bounded_reconnects_give_up_but_keep_the_session_for_logout() {
    let mut h = Harness::with_settings(|s| s.engine.reconnect.max_attempts = Some(1));
    h.hydrate();

    h.push(Frame::Closed(None));
    h.advance(Duration::from_secs(5));
    assert_eq!(h.wires.borrow().len(), 2);

    h.push(Frame::Closed(Some("refused".into())));
    assert!(h.view().has("status work disconnected"));
    assert!(h.view().has("failed giving up after 1 reconnection attempts"));

    h.advance(Duration::from_secs(30));
    assert_eq!(h.wires.borrow().len(), 2);
    assert!(h.engine.connected_servers().is_empty());
    assert_eq!(h.engine.logged_in_servers(), vec!["work".to_string()]);
    assert_eq!(h.engine.logout_request("work").unwrap().path(), "/users/logout");
}

#[test]
fn long_backlog_is_paged_from_the_last_applied_post() {
    let mut h = Harness::new();
    h.login();
    h.serve("/users?page=0&per_page=60", &users(&["bob"]));
    h.serve("/users/me/preferences", "[]");
    h.serve("/users/me/teams", r#"[{"id": "t1", "name": "team"}]"#);
    h.serve(
        "/users/me/teams/t1/channels",
        r#"[{"id": "c1", "type": "O", "name": "town", "team_id": "t1", "last_post_at": 4000}]"#,
    );
    h.serve(
        "/users/me/channels/c1/posts/unread?limit_after=1",
        &page(&[post("p1", "c1", 1000, "a"), post("p2", "c1", 2000, "b")], "p3"),
    );
    h.serve("/channels/c1/members?page=0&per_page=200", "[]");
    h.serve("/users/me/channel_members?page=0&pageSize=100", "[]");
    assert!(h.engine.server("work").unwrap().channel("c1").unwrap().loading);

    h.serve(
        "/channels/c1/posts?after=p2",
        &page(&[post("p3", "c1", 3000, "c"), post("p4", "c1", 4000, "d")], ""),
    );

    assert_eq!(h.post_ids("c1"), vec!["p1", "p2", "p3", "p4"]);
    let channel = h.engine.server("work").unwrap().channel("c1").unwrap();
    assert!(!channel.loading);
    assert!(channel.has_unread());
    assert!(h.idle());
}
