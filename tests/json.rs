mod support;

use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use support::server;
use waypoint::redirect::{Attempt, Policy};
use waypoint::{Client, StatusCode};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Item {
    id: u32,
    name: String,
}

#[tokio::test]
async fn request_json_body() {
    let _ = env_logger::try_init();
    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "POST");
        assert_eq!(req.headers()["content-type"], "application/json");
        let data = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&*data, br#"{"id":7,"name":"gear"}"#);
        http::Response::default()
    });

    let item = Item {
        id: 7,
        name: "gear".into(),
    };
    let res = Client::new()
        .post(server.url("/items"))
        .json(&item)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn response_json() {
    let _ = env_logger::try_init();
    let server = server::http(move |_req| async {
        http::Response::new(r#"{"id":1,"name":"bolt"}"#.into())
    });

    let item: Item = Client::new()
        .get(server.url("/items/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        item,
        Item {
            id: 1,
            name: "bolt".into()
        }
    );
}

#[tokio::test]
async fn response_json_decode_error() {
    let _ = env_logger::try_init();
    let server = server::http(move |_req| async { http::Response::new("not json".into()) });

    let err = Client::new()
        .get(server.url("/broken"))
        .send()
        .await
        .unwrap()
        .json::<Item>()
        .await
        .unwrap_err();

    assert!(err.is_decode());
}

#[tokio::test]
async fn json_body_replays_on_307() {
    let _ = env_logger::try_init();
    let server = server::http(move |req| async move {
        let path = req.uri().path().to_owned();
        let data = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&*data, br#"{"id":3,"name":"nut"}"#);
        if path == "/old" {
            http::Response::builder()
                .status(307)
                .header("location", "/new")
                .body(Default::default())
                .unwrap()
        } else {
            http::Response::new(r#"{"id":3,"name":"nut"}"#.into())
        }
    });

    let seen_json = Policy::modify(|attempt: Attempt| async move {
        assert_eq!(
            attempt.proposed().headers()["content-type"],
            "application/json"
        );
        Ok::<_, waypoint::Error>(attempt.follow())
    });

    let item: Item = Client::new()
        .post(server.url("/old"))
        .json(&Item {
            id: 3,
            name: "nut".into(),
        })
        .redirect(seen_json)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(item.name, "nut");
}
