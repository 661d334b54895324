use crate::middleware::throttle::ThrottleRetryAfter;
use rocket::http::{Header, Status};
use rocket::response::Responder;
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub message: String,
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    // One body for every authentication failure kind; the specifics are in
    // the logs, not in the response.
    Json(Error {
        message: "Authentication failed".to_string(),
    })
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Not found".to_string(),
    })
}

#[catch(429)]
pub fn too_many_requests(req: &Request) -> TooManyRequests {
    let retry_after = req
        .local_cache(|| None::<ThrottleRetryAfter>)
        .as_ref()
        .map(|r| r.0)
        .unwrap_or(60);

    TooManyRequests { retry_after }
}

pub struct TooManyRequests {
    retry_after: u64,
}

impl<'r> Responder<'r, 'static> for TooManyRequests {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'static> {
        let body = Json(Error {
            message: "Too many requests".to_string(),
        });
        let mut response = body.respond_to(req)?;
        response.set_status(Status::TooManyRequests);
        response.set_header(Header::new("Retry-After", self.retry_after.to_string()));
        Ok(response)
    }
}
